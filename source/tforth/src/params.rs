use serde::{Deserialize, Serialize};

/// Sizing parameters of a [`Forth`](crate::Forth) VM.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Params {
    #[serde(default = "Params::default_stack_size")]
    pub data_stack_elems: usize,
    #[serde(default = "Params::default_stack_size")]
    pub return_stack_elems: usize,
    #[serde(default = "Params::default_stack_size")]
    pub temp_stack_elems: usize,
    #[serde(default = "Params::default_self_stack_size")]
    pub self_stack_elems: usize,
    #[serde(default = "Params::default_input_buf_size")]
    pub input_buf_elems: usize,
    #[serde(default = "Params::default_output_buf_size")]
    pub output_buf_elems: usize,
}

impl Params {
    pub const DEFAULT_STACK_SIZE: usize = 256;
    pub const DEFAULT_SELF_STACK_SIZE: usize = 64;
    pub const DEFAULT_INPUT_BUF_SIZE: usize = 256;
    pub const DEFAULT_OUTPUT_BUF_SIZE: usize = 4096;

    const fn default_stack_size() -> usize {
        Self::DEFAULT_STACK_SIZE
    }
    const fn default_self_stack_size() -> usize {
        Self::DEFAULT_SELF_STACK_SIZE
    }
    const fn default_input_buf_size() -> usize {
        Self::DEFAULT_INPUT_BUF_SIZE
    }
    const fn default_output_buf_size() -> usize {
        Self::DEFAULT_OUTPUT_BUF_SIZE
    }

    pub const fn new() -> Self {
        Self {
            data_stack_elems: Self::DEFAULT_STACK_SIZE,
            return_stack_elems: Self::DEFAULT_STACK_SIZE,
            temp_stack_elems: Self::DEFAULT_STACK_SIZE,
            self_stack_elems: Self::DEFAULT_SELF_STACK_SIZE,
            input_buf_elems: Self::DEFAULT_INPUT_BUF_SIZE,
            output_buf_elems: Self::DEFAULT_OUTPUT_BUF_SIZE,
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::new()
    }
}
