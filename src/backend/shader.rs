// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The blobs are compiled ahead of time
// (see build.rs) and read from disk once at startup; modules are created
// per pipeline build and destroyed as soon as the pipeline exists.

use super::error::{RendererError, Result};
use super::VulkanDevice;
use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Validated SPIR-V words for one shader stage
#[derive(Debug, Clone)]
pub struct SpirvBlob {
    pub path: PathBuf,
    pub words: Vec<u32>,
}

impl SpirvBlob {
    /// Read and validate a compiled shader from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| shader_error(path, e.to_string()))?;
        Self::from_bytes(path, &bytes)
    }

    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(shader_error(path, "file is empty"));
        }

        // read_spv checks the length and fixes up endianness + alignment
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| shader_error(path, e.to_string()))?;

        if words.first() != Some(&SPIRV_MAGIC) {
            return Err(shader_error(path, "missing SPIR-V magic number"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            words,
        })
    }

    pub fn create_module(&self, device: &VulkanDevice) -> Result<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&self.words);

        unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(RendererError::PipelineCreation)
    }
}

/// Vertex + fragment stages of the triangle pipeline
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub vertex: SpirvBlob,
    pub fragment: SpirvBlob,
}

impl ShaderSet {
    pub fn load(vertex: impl AsRef<Path>, fragment: impl AsRef<Path>) -> Result<Self> {
        let set = Self {
            vertex: SpirvBlob::load(vertex)?,
            fragment: SpirvBlob::load(fragment)?,
        };
        log::info!(
            "Loaded shaders {:?} ({} words), {:?} ({} words)",
            set.vertex.path,
            set.vertex.words.len(),
            set.fragment.path,
            set.fragment.words.len()
        );
        Ok(set)
    }
}

fn shader_error(path: &Path, reason: impl Into<String>) -> RendererError {
    RendererError::ShaderLoad {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
