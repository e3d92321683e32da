/*!
 * Scripted compiler for testing.
 *
 * Steps are consumed in order; once the script is empty the optional check
 * decides, and without a check the fallback step applies.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::CompileError;

use super::{CompileAttempt, CompileRequest, Compiler, WorkingTree};

/// One scripted compiler reaction
#[derive(Debug, Clone, PartialEq)]
pub enum MockCompileStep {
    Succeed,
    /// Fail with the given log
    Fail(String),
    /// Report a timeout error
    Timeout,
}

#[derive(Debug, Default)]
struct MockCompilerState {
    script: VecDeque<MockCompileStep>,
    compiled: Vec<WorkingTree>,
    requests: Vec<CompileRequest>,
}

/// Compiler double recording every tree it is given
#[derive(Debug, Clone)]
pub struct MockCompiler {
    state: Arc<Mutex<MockCompilerState>>,
    /// Returns a failure log for trees that should not compile
    check: Option<fn(&WorkingTree) -> Option<String>>,
    /// Used when neither script nor check decides
    fallback: MockCompileStep,
}

impl Default for MockCompiler {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockCompilerState::default())),
            check: None,
            fallback: MockCompileStep::Succeed,
        }
    }
}

impl MockCompiler {
    /// Compiler that always succeeds
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Compiler that always fails with `log`
    pub fn failing(log: impl Into<String>) -> Self {
        Self { fallback: MockCompileStep::Fail(log.into()), ..Self::default() }
    }

    pub fn scripted(steps: impl IntoIterator<Item = MockCompileStep>) -> Self {
        let compiler = Self::default();
        compiler.state.lock().script.extend(steps);
        compiler
    }

    /// Decide outcomes from the tree once the script is used up
    pub fn with_check(mut self, check: fn(&WorkingTree) -> Option<String>) -> Self {
        self.check = Some(check);
        self
    }

    /// Trees compiled so far, in order
    pub fn compiled(&self) -> Vec<WorkingTree> {
        self.state.lock().compiled.clone()
    }

    pub fn requests(&self) -> Vec<CompileRequest> {
        self.state.lock().requests.clone()
    }

    pub fn compile_count(&self) -> usize {
        self.state.lock().compiled.len()
    }
}

#[async_trait]
impl Compiler for MockCompiler {
    async fn compile(&self, tree: &WorkingTree, request: CompileRequest) -> Result<CompileAttempt, CompileError> {
        let step = {
            let mut state = self.state.lock();
            state.compiled.push(tree.clone());
            state.requests.push(request);
            state.script.pop_front()
        };

        let step = match step {
            Some(step) => step,
            None => match self.check {
                Some(check) => match check(tree) {
                    Some(log) => MockCompileStep::Fail(log),
                    None => MockCompileStep::Succeed,
                },
                None => self.fallback.clone(),
            },
        };

        let (success, log) = match step {
            MockCompileStep::Succeed => (true, "Output written on main.pdf".to_string()),
            MockCompileStep::Fail(log) => (false, log),
            MockCompileStep::Timeout => return Err(CompileError::Timeout(request.timeout)),
        };

        Ok(CompileAttempt {
            attempt: request.attempt,
            exit_code: Some(if success { 0 } else { 12 }),
            log,
            duration: Duration::from_millis(1),
            success,
            artifact: success.then(|| PathBuf::from(format!("{}.pdf", tree.entry.trim_end_matches(".tex")))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latex::SourceTree;

    fn tree() -> WorkingTree {
        WorkingTree::new("main.tex", SourceTree::from_files([("main.tex", "x")]))
    }

    fn request(attempt: u32) -> CompileRequest {
        CompileRequest { attempt, timeout: Duration::from_secs(1) }
    }

    #[tokio::test]
    async fn test_scripted_shouldFollowStepsThenSucceed() {
        let compiler = MockCompiler::scripted([MockCompileStep::Fail("! boom".to_string())]);

        let first = compiler.compile(&tree(), request(1)).await.unwrap();
        let second = compiler.compile(&tree(), request(2)).await.unwrap();

        assert!(!first.success);
        assert_eq!(first.log, "! boom");
        assert!(second.success);
        assert_eq!(second.artifact, Some(PathBuf::from("main.pdf")));
        assert_eq!(compiler.compile_count(), 2);
    }

    #[tokio::test]
    async fn test_withCheck_shouldInspectTree() {
        let compiler = MockCompiler::default().with_check(|tree| {
            tree.text("main.tex").filter(|t| t.contains('x')).map(|_| "! Undefined control sequence.".to_string())
        });

        let attempt = compiler.compile(&tree(), request(1)).await.unwrap();
        assert!(!attempt.success);
    }

    #[tokio::test]
    async fn test_failing_shouldAlwaysFail() {
        let compiler = MockCompiler::failing("! Emergency stop.");
        for attempt in 1..=3 {
            assert!(!compiler.compile(&tree(), request(attempt)).await.unwrap().success);
        }
    }

    #[tokio::test]
    async fn test_timeoutStep_shouldReturnError() {
        let compiler = MockCompiler::scripted([MockCompileStep::Timeout]);
        let result = compiler.compile(&tree(), request(1)).await;
        assert!(matches!(result, Err(CompileError::Timeout(_))));
    }
}
