use std::time::Duration;

use futures::stream::BoxStream;

use crate::{DocchatError, Runnable, StreamEvent};

pub struct Retrying<R> {
    runnable: R,
    max_attempts: usize,
    base_delay: Duration,
}

impl<R> Retrying<R> {
    pub fn new(runnable: R, max_attempts: usize) -> Self {
        Self {
            runnable,
            max_attempts,
            base_delay: Duration::from_millis(200),
        }
    }

    /// Delay before the second attempt; doubles for each following attempt.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(6) as u32;
        self.base_delay.saturating_mul(factor)
    }
}

pub fn is_retryable(error: &DocchatError) -> bool {
    matches!(
        error,
        DocchatError::LlmProvider(_) | DocchatError::Timeout(_)
    )
}

#[async_trait::async_trait]
impl<Input, Output, R> Runnable<Input, Output> for Retrying<R>
where
    Input: Send + Clone + 'static,
    Output: Send + 'static,
    R: Runnable<Input, Output> + Send + Sync,
{
    async fn invoke(&self, input: Input) -> Result<Output, DocchatError> {
        if self.max_attempts == 0 {
            return Err(DocchatError::MaxRetriesExceeded { max: 0 });
        }

        for attempt in 1..=self.max_attempts {
            match self.runnable.invoke(input.clone()).await {
                Ok(output) => return Ok(output),
                Err(error) => {
                    if !is_retryable(&error) {
                        return Err(error);
                    }

                    if attempt == self.max_attempts {
                        return Err(DocchatError::MaxRetriesExceeded {
                            max: self.max_attempts,
                        });
                    }

                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(DocchatError::MaxRetriesExceeded {
            max: self.max_attempts,
        })
    }

    // A stream that has started emitting tokens cannot be replayed safely.
    fn stream(&self, input: Input) -> BoxStream<'_, Result<StreamEvent, DocchatError>> {
        self.runnable.stream(input)
    }
}

pub trait RunnableExt<Input: Send + 'static, Output: Send + 'static>:
    Runnable<Input, Output> + Sized
{
    fn with_retries(self, max_attempts: usize) -> Retrying<Self> {
        Retrying::new(self, max_attempts)
    }
}

impl<Input: Send + 'static, Output: Send + 'static, T> RunnableExt<Input, Output> for T where
    T: Runnable<Input, Output> + Sized
{
}
