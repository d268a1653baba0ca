//! Circuit task scope.
//!
//! Every call into the [`CircuitProvider`](crate::CircuitProvider) runs
//! inside this scope. A provider that needs a name resolved must not route
//! the lookup back through the onion resolver, since that would wait on the
//! very circuits being built; the resolver checks the scope and fails fast
//! with [`NetError::ResolutionLoop`](strata_net::NetError::ResolutionLoop).
//!
//! The scope is task-local, so it follows the future and not the thread.
//! It is not inherited by `tokio::spawn`: providers that run work on their
//! own tasks spawn them with [`spawn_in_circuit_scope`].

use std::future::Future;

tokio::task_local! {
    static CIRCUIT_SCOPE: ();
}

/// Run `fut` inside the circuit scope.
pub async fn in_circuit_scope<F: Future>(fut: F) -> F::Output {
    CIRCUIT_SCOPE.scope((), fut).await
}

/// Run `f` inside the circuit scope, synchronously.
pub fn in_circuit_scope_sync<R>(f: impl FnOnce() -> R) -> R {
    CIRCUIT_SCOPE.sync_scope((), f)
}

/// Spawn `fut` as a new task inside the circuit scope.
pub fn spawn_in_circuit_scope<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(CIRCUIT_SCOPE.scope((), fut))
}

/// Whether the current task is inside a circuit-layer call.
pub fn inside_circuit_scope() -> bool {
    CIRCUIT_SCOPE.try_with(|_| ()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_follows_future() {
        assert!(!inside_circuit_scope());
        assert!(in_circuit_scope(async { inside_circuit_scope() }).await);
        assert!(in_circuit_scope_sync(inside_circuit_scope));
        assert!(!inside_circuit_scope());

        // A spawned task does not inherit the scope.
        let spawned = in_circuit_scope(async {
            tokio::spawn(async { inside_circuit_scope() }).await
        })
        .await
        .expect("join");
        assert!(!spawned);

        let carried = spawn_in_circuit_scope(async { inside_circuit_scope() })
            .await
            .expect("join");
        assert!(carried);
    }
}
