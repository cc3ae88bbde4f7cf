//! Shared helpers for the test modules

#[cfg(test)]
pub mod helpers {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::resilience::Sleeper;

    /// Sleeper that never wakes up; `entered` resolves once a delay starts
    #[derive(Debug, Clone, Default)]
    pub struct StalledSleeper {
        started: Arc<Notify>,
    }

    impl StalledSleeper {
        pub fn new() -> Self {
            Self::default()
        }

        /// Wait until some caller is blocked in `sleep`
        pub async fn entered(&self) {
            self.started.notified().await;
        }
    }

    #[async_trait]
    impl Sleeper for StalledSleeper {
        async fn sleep(&self, _duration: Duration) {
            self.started.notify_one();
            std::future::pending::<()>().await;
        }
    }
}
