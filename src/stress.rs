//! The generate, compile, execute, retry loop behind `/getTestCase`.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::generator::{CodeGenerator, ThinkingLevel, build_prompt, strip_code_fences};
use crate::sandbox::{CheckOutcome, StressSandbox};

#[derive(Debug, Clone)]
pub struct StressRequest {
    pub code: String,
    pub problem_statement: String,
    pub thinking_level: ThinkingLevel,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StressOutcome {
    Found { test_case: String, attempts: u32 },
    Exhausted { attempts: u32 },
}

pub struct StressTester {
    generator: Arc<dyn CodeGenerator>,
    sandbox: Arc<dyn StressSandbox>,
    max_attempts: u32,
    sessions: Semaphore,
}

impl StressTester {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        sandbox: Arc<dyn StressSandbox>,
        max_attempts: u32,
        max_sessions: usize,
    ) -> Self {
        Self {
            generator,
            sandbox,
            max_attempts,
            sessions: Semaphore::new(max_sessions),
        }
    }

    /// Asks for a stress-tester and runs it, up to `max_attempts` times.
    ///
    /// Every attempt starts from the same prompt. An attempt is used up by an empty
    /// generation, a failed API call, a compile error, a timeout or a silent run.
    /// The first program that prints anything ends the loop.
    pub async fn find_counterexample(
        &self,
        request: &StressRequest,
    ) -> anyhow::Result<StressOutcome> {
        let _permit = self.sessions.acquire().await?;
        let prompt = build_prompt(&request.problem_statement, &request.code);

        for attempt in 1..=self.max_attempts {
            let generated = match self.generator.generate(&prompt, request.thinking_level).await {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Attempt {attempt}: generation failed: {e:#}");
                    continue;
                }
            };

            let source = strip_code_fences(&generated);
            if source.is_empty() {
                log::info!("Attempt {attempt}: empty generation");
                continue;
            }

            let outcome = match self.sandbox.check(source).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("Attempt {attempt}: sandbox failure: {e:#}");
                    continue;
                }
            };

            match outcome.counterexample() {
                Some(test_case) => {
                    log::info!("Attempt {attempt}: counter-example found");
                    return Ok(StressOutcome::Found {
                        test_case: test_case.to_string(),
                        attempts: attempt,
                    });
                }
                None => match &outcome {
                    CheckOutcome::CompileError(_) => {
                        log::info!("Attempt {attempt}: generated program did not compile")
                    }
                    CheckOutcome::TimedOut { .. } => {
                        log::info!("Attempt {attempt}: generated program timed out")
                    }
                    CheckOutcome::Finished { .. } => {
                        log::info!("Attempt {attempt}: no failing input found")
                    }
                },
            }
        }

        Ok(StressOutcome::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;

    /// Replays scripted generations, then keeps returning empty text
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<anyhow::Result<String>>>,
        calls: AtomicU32,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<anyhow::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CodeGenerator for ScriptedGenerator {
        async fn generate(&self, _prompt: &str, _level: ThinkingLevel) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    /// Interprets the "source" as the outcome to report
    struct EchoSandbox {
        checked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StressSandbox for EchoSandbox {
        async fn check(&self, source: &str) -> anyhow::Result<CheckOutcome> {
            self.checked.lock().unwrap().push(source.to_string());
            Ok(match source {
                "compile-error" => CheckOutcome::CompileError("error".into()),
                "timeout" => CheckOutcome::TimedOut {
                    stdout: String::new(),
                    stderr: String::new(),
                },
                "silent" => CheckOutcome::Finished {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: Some(0),
                },
                "broken" => return Err(anyhow!("disk full")),
                other => CheckOutcome::Finished {
                    stdout: other.to_string(),
                    stderr: String::new(),
                    exit_code: Some(0),
                },
            })
        }
    }

    fn tester(generator: Arc<ScriptedGenerator>, max_attempts: u32) -> (StressTester, Arc<EchoSandbox>) {
        let sandbox = Arc::new(EchoSandbox {
            checked: Mutex::new(Vec::new()),
        });
        (
            StressTester::new(generator, sandbox.clone(), max_attempts, 1),
            sandbox,
        )
    }

    fn request() -> StressRequest {
        StressRequest {
            code: "signed main(){}".into(),
            problem_statement: "print a+b".into(),
            thinking_level: ThinkingLevel::Standard,
        }
    }

    #[tokio::test]
    async fn test_retries_until_output() {
        let generator = ScriptedGenerator::new(vec![
            Ok(String::new()),
            Err(anyhow!("quota")),
            Ok("compile-error".into()),
            Ok("timeout".into()),
            Ok("broken".into()),
            Ok("silent".into()),
            Ok("```cpp\n1 2\n```".into()),
        ]);
        let (tester, sandbox) = tester(generator.clone(), 10);

        let outcome = tester.find_counterexample(&request()).await.unwrap();

        assert_eq!(
            outcome,
            StressOutcome::Found {
                test_case: "1 2".into(),
                attempts: 7
            }
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 7);
        // Empty and failed generations never reach the sandbox
        assert_eq!(sandbox.checked.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let generator = ScriptedGenerator::new(vec![]);
        let (tester, _sandbox) = tester(generator.clone(), 10);

        let outcome = tester.find_counterexample(&request()).await.unwrap();

        assert_eq!(outcome, StressOutcome::Exhausted { attempts: 10 });
        assert_eq!(generator.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_first_attempt_success_stops_loop() {
        let generator = ScriptedGenerator::new(vec![Ok("42".into()), Ok("never".into())]);
        let (tester, _sandbox) = tester(generator.clone(), 10);

        let outcome = tester.find_counterexample(&request()).await.unwrap();

        assert_eq!(
            outcome,
            StressOutcome::Found {
                test_case: "42".into(),
                attempts: 1
            }
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }
}
