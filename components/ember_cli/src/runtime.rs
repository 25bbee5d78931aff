//! Runtime orchestration for image execution
//!
//! The Runtime owns one [`Context`] and drives it the way a host
//! application would: run the top-level code once, then deliver frame
//! ticks to the registered listeners.

use std::path::Path;
use std::sync::Arc;

use bytecode_system::BytecodeImage;
use core_types::Value;
use interpreter::{Closure, Context, VmConfig};
use memory_manager::CollectStats;
use tracing::{debug, info};

use crate::error::CliResult;

/// Global a script defines to receive frame ticks from the CLI
pub const TICK_HANDLER: &str = "onTick";

/// Host runtime around a single VM context
pub struct Runtime {
    context: Context,
}

impl Runtime {
    /// Create a runtime with the given limits
    ///
    /// # Example
    /// ```
    /// use ember_cli::Runtime;
    /// use interpreter::VmConfig;
    ///
    /// let runtime = Runtime::new(VmConfig::default());
    /// assert_eq!(runtime.context().call_depth(), 0);
    /// ```
    pub fn new(config: VmConfig) -> Self {
        Self {
            context: Context::new(config),
        }
    }

    /// The underlying context
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The underlying context, mutably
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Execute a persisted image file
    ///
    /// # Arguments
    /// * `path` - Path to the image
    ///
    /// # Returns
    /// The value returned by the image's top-level code
    ///
    /// # Errors
    /// Returns `CliError` if the file cannot be read, is malformed, or
    /// execution fails fatally
    pub fn execute_file(&mut self, path: impl AsRef<Path>) -> CliResult<Value> {
        let path = path.as_ref();
        let image = BytecodeImage::read_from(path)?;
        debug!(path = %path.display(), bytes = image.code().len(), "image loaded");
        self.execute_image(image)
    }

    /// Execute an in-memory image
    ///
    /// # Example
    /// ```
    /// use bytecode_system::{ImageBuilder, Opcode};
    /// use core_types::Value;
    /// use ember_cli::Runtime;
    /// use interpreter::VmConfig;
    ///
    /// let mut builder = ImageBuilder::new();
    /// builder.push_number(7.0).op(Opcode::Return);
    ///
    /// let mut runtime = Runtime::new(VmConfig::default());
    /// let result = runtime.execute_image(builder.build().unwrap()).unwrap();
    /// assert_eq!(result, Value::Number(7.0));
    /// ```
    pub fn execute_image(&mut self, image: BytecodeImage) -> CliResult<Value> {
        Ok(self.context.run_image(Arc::new(image))?)
    }

    /// Register the script's tick handler as a frame listener.
    ///
    /// Looks up [`TICK_HANDLER`] on the global object; the global object is
    /// the listener target. Returns false when the script defines no
    /// handler.
    pub fn attach_tick_handler(&mut self) -> bool {
        let global = self.context.global().clone();
        let name = self.context.get_symbol(TICK_HANDLER);
        let handler = self.context.get_property(&global, name);
        match handler.as_object().and_then(Closure::from_object) {
            Some(closure) => {
                self.context.add_frame_listener(global, closure);
                true
            }
            None => false,
        }
    }

    /// Deliver `count` ticks, `step` seconds apart, starting at `step`
    pub fn run_ticks(&mut self, count: u32, step: f64) -> CliResult<()> {
        for frame in 1..=count {
            self.context.tick(f64::from(frame) * step)?;
        }
        if count > 0 {
            debug!(count, step, "ticks delivered");
        }
        Ok(())
    }

    /// Run one cycle collection
    pub fn collect(&mut self) -> CliResult<CollectStats> {
        let stats = self.context.collect_cycles()?;
        info!(reclaimed = stats.reclaimed(), "collection finished");
        Ok(stats)
    }

    /// Strings recorded by the `Trace` opcode since the last call
    pub fn take_trace_output(&mut self) -> Vec<String> {
        self.context.take_trace_output()
    }
}

/// Load a [`VmConfig`] from a JSON file; omitted fields keep their defaults
pub fn load_config(path: impl AsRef<Path>) -> CliResult<VmConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Read an image file and return its listing
pub fn disassemble_file(path: impl AsRef<Path>) -> CliResult<String> {
    let image = BytecodeImage::read_from(path)?;
    Ok(bytecode_system::disassemble(&image))
}
