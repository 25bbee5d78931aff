//! Bytecode image - code buffer plus constant pool
//!
//! An image is built (or deserialized), prepared exactly once, and from
//! then on shared read-only through `Arc` by every closure created over it.

use std::fs;
use std::path::Path;

use core_types::{VmError, VmResult};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::function::CodeRange;
use crate::prepare::{self, PreparedImage};
use crate::value::ConstValue;

/// A compiled unit of bytecode
#[derive(Debug, Clone, Default)]
pub struct BytecodeImage {
    code: Vec<u8>,
    constants: Vec<ConstValue>,
    prepared: OnceCell<PreparedImage>,
}

impl BytecodeImage {
    /// Create an unprepared image
    pub fn new(code: Vec<u8>, constants: Vec<ConstValue>) -> Self {
        Self {
            code,
            constants,
            prepared: OnceCell::new(),
        }
    }

    /// The instruction stream
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// The constant pool
    pub fn constants(&self) -> &[ConstValue] {
        &self.constants
    }

    /// Constant at `index`
    pub fn constant(&self, index: usize) -> Option<&ConstValue> {
        self.constants.get(index)
    }

    /// Append a constant and return its stable index
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::{BytecodeImage, ConstValue};
    ///
    /// let mut image = BytecodeImage::default();
    /// assert_eq!(image.add_const_data(ConstValue::Number(1.0)), 0);
    /// assert_eq!(image.add_const_data(ConstValue::from("x")), 1);
    /// ```
    pub fn add_const_data(&mut self, value: ConstValue) -> usize {
        let index = self.constants.len();
        self.constants.push(value);
        index
    }

    /// Run the preparation pass, or return the cached result.
    ///
    /// A failure is not cached: the image stays unprepared.
    pub fn prepare(&self) -> VmResult<&PreparedImage> {
        self.prepared
            .get_or_try_init(|| prepare::prepare(&self.code, &self.constants))
    }

    /// The cached preparation, if [`BytecodeImage::prepare`] succeeded
    pub fn prepared(&self) -> Option<&PreparedImage> {
        self.prepared.get()
    }

    /// Whether the image has been prepared
    pub fn is_prepared(&self) -> bool {
        self.prepared.get().is_some()
    }

    /// The prepared top-level body
    pub fn top_level(&self) -> VmResult<CodeRange> {
        self.prepared()
            .map(PreparedImage::top_level)
            .ok_or_else(|| VmError::invalid_state("image has not been prepared"))
    }

    /// Serialize to the persisted format
    ///
    /// Layout (little-endian): `u32` code size, code bytes, `u32` constant
    /// count, then each constant as a tag byte and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.code.len());
        bytes.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.code);
        bytes.extend_from_slice(&(self.constants.len() as u32).to_le_bytes());
        for constant in &self.constants {
            constant.write_bytes(&mut bytes);
        }
        bytes
    }

    /// Deserialize from the persisted format and prepare the result
    pub fn from_bytes(bytes: &[u8]) -> VmResult<Self> {
        let mut reader = Reader { bytes, offset: 0 };

        let code_len = reader.u32("code size")? as usize;
        let code = reader.take(code_len, "code")?.to_vec();

        let const_count = reader.u32("constant count")? as usize;
        let mut constants = Vec::with_capacity(const_count.min(1024));
        for _ in 0..const_count {
            let at = reader.offset;
            let (value, used) =
                ConstValue::from_bytes(&bytes[at..]).map_err(|error| error.at(at))?;
            constants.push(value);
            reader.offset += used;
        }

        if reader.offset != bytes.len() {
            return Err(VmError::format(format!(
                "{} trailing bytes after constant pool",
                bytes.len() - reader.offset
            ))
            .at(reader.offset));
        }

        let image = Self::new(code, constants);
        image.prepare()?;
        debug!(
            code = image.code.len(),
            constants = image.constants.len(),
            "loaded image"
        );
        Ok(image)
    }

    /// Read and prepare an image file
    pub fn read_from(path: impl AsRef<Path>) -> VmResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| VmError::host(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
    }

    /// Write the persisted form to a file
    pub fn write_to(&self, path: impl AsRef<Path>) -> VmResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes())
            .map_err(|e| VmError::host(format!("cannot write {}: {}", path.display(), e)))
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> VmResult<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.offset..self.offset.saturating_add(len))
            .ok_or_else(|| VmError::format(format!("truncated {}", what)).at(self.offset))?;
        self.offset += len;
        Ok(slice)
    }

    fn u32(&mut self, what: &str) -> VmResult<u32> {
        let raw = self.take(4, what)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}
