pub const DEFAULT_STACK_CAPACITY: usize = 1000;
pub const DEFAULT_MEMORY_CAPACITY: usize = 640_000;

/// Settings shared by the emitter, the interpreter and the toolchain driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of values on the interpreter's stack.
    pub stack_capacity: usize,
    /// Bytes reserved for the `mem` region in both backends.
    pub memory_capacity: usize,
    pub assembler: String,
    pub linker: String,
    /// Process arguments seen by `argc`/`argv` in the interpreter, program name first.
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            assembler: "nasm".to_string(),
            linker: "ld".to_string(),
            args: Vec::new(),
        }
    }
}
