//! The external process-driver contract.
//!
//! The crate never spawns executables itself: an [`InvokerFactory`] is
//! injected by the embedding application. The contract is a synchronous
//! line-oriented request/response channel - stream command lines in, get
//! the captured stdout back as an ordered list of lines.

use crate::error::{ProcessError, Result};

/// One running external process, line-driven.
pub trait BackendInvoker: Send {
    /// Spawn the process.
    fn start(&mut self) -> Result<()>;

    /// Stream one command line to the process. Repeatable.
    fn input(&mut self, line: &str) -> Result<()>;

    /// Close stdin, block until exit, return captured stdout in order.
    fn close_wait(&mut self) -> Result<Vec<String>>;
}

/// Spawns invokers for named programs and answers availability probes.
pub trait InvokerFactory: Send + Sync {
    /// Whether `program` can be spawned at all. Cheap; called by the
    /// backend factory during candidate probing.
    fn available(&self, program: &str) -> bool;

    fn spawn(&self, program: &str) -> Result<Box<dyn BackendInvoker>>;
}

/// Scripted invoker for tests and dry runs: records the command lines it
/// was fed and replays a canned stdout transcript.
pub struct ScriptedInvoker {
    started: bool,
    inputs: Vec<String>,
    output: Vec<String>,
}

impl ScriptedInvoker {
    pub fn new(output: Vec<String>) -> Self {
        Self {
            started: false,
            inputs: Vec::new(),
            output,
        }
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }
}

impl BackendInvoker for ScriptedInvoker {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn input(&mut self, line: &str) -> Result<()> {
        if !self.started {
            return Err(ProcessError::Io {
                path: "<scripted>".to_string(),
                reason: "input before start".to_string(),
            });
        }
        self.inputs.push(line.to_string());
        Ok(())
    }

    fn close_wait(&mut self) -> Result<Vec<String>> {
        Ok(std::mem::take(&mut self.output))
    }
}

/// Factory handing out scripted invokers keyed by program name. Programs
/// not in the script map probe as unavailable.
pub struct ScriptedInvokerFactory {
    scripts: std::sync::Mutex<std::collections::HashMap<String, Vec<Vec<String>>>>,
}

impl ScriptedInvokerFactory {
    pub fn new() -> Self {
        Self {
            scripts: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Queue one transcript for `program`; successive spawns consume
    /// transcripts in order, the last one repeating.
    pub fn add_script(&self, program: &str, output: Vec<String>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push(output);
    }
}

impl Default for ScriptedInvokerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl InvokerFactory for ScriptedInvokerFactory {
    fn available(&self, program: &str) -> bool {
        self.scripts.lock().unwrap().contains_key(program)
    }

    fn spawn(&self, program: &str) -> Result<Box<dyn BackendInvoker>> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(program)
            .ok_or_else(|| ProcessError::NotAvailable {
                backend: program.to_string(),
            })?;
        let output = if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue.first().cloned().unwrap_or_default()
        };
        Ok(Box::new(ScriptedInvoker::new(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_replay() {
        let mut invoker = ScriptedInvoker::new(vec!["a".to_string(), "b".to_string()]);
        invoker.start().unwrap();
        invoker.input("template x_####.img").unwrap();
        let output = invoker.close_wait().unwrap();
        assert_eq!(output, vec!["a", "b"]);
        assert_eq!(invoker.inputs(), ["template x_####.img"]);
    }

    #[test]
    fn test_input_before_start_fails() {
        let mut invoker = ScriptedInvoker::new(vec![]);
        assert!(invoker.input("x").is_err());
    }

    #[test]
    fn test_factory_availability() {
        let factory = ScriptedInvokerFactory::new();
        assert!(!factory.available("ipmosflm"));
        factory.add_script("ipmosflm", vec![]);
        assert!(factory.available("ipmosflm"));
        assert!(factory.spawn("xds").is_err());
    }

    #[test]
    fn test_factory_transcript_order() {
        let factory = ScriptedInvokerFactory::new();
        factory.add_script("p", vec!["first".to_string()]);
        factory.add_script("p", vec!["second".to_string()]);

        let mut a = factory.spawn("p").unwrap();
        a.start().unwrap();
        assert_eq!(a.close_wait().unwrap(), vec!["first"]);

        // last transcript repeats
        for _ in 0..2 {
            let mut b = factory.spawn("p").unwrap();
            b.start().unwrap();
            assert_eq!(b.close_wait().unwrap(), vec!["second"]);
        }
    }
}
