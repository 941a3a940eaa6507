// Texture resource

use glam::{UVec2, UVec3};

use super::device::Context;
use super::handle::{allocate, Owned, TextureKind};
use super::types::{PixelFormat, Sampler, TextureUsage};
use crate::driver::{NativeEnum, ObjectId};
use crate::error::{check, BackendError, BackendResult, ErrorKind};

/// Shape, format and sampling of a texture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDesc {
    pub usage: TextureUsage,
    pub format: PixelFormat,
    /// Width, height and depth (layers for arrays); unused axes are 1
    pub size: UVec3,
    pub mip_levels: u32,
    /// Sample count, only meaningful for multisample textures
    pub samples: u32,
    pub sampler: Sampler,
}

impl TextureDesc {
    pub fn new_2d(format: PixelFormat, size: UVec2) -> Self {
        Self {
            usage: TextureUsage::Texture2D,
            format,
            size: size.extend(1),
            mip_levels: 1,
            samples: 1,
            sampler: Sampler::default(),
        }
    }

    pub fn multisample(format: PixelFormat, size: UVec2, samples: u32) -> Self {
        Self { usage: TextureUsage::Multisample, samples, ..Self::new_2d(format, size) }
    }

    /// Extent of mip `level`; array layers don't shrink
    pub fn level_size(&self, level: u32) -> UVec3 {
        let shrink = |v: u32| (v >> level).max(1);
        match self.usage {
            TextureUsage::Texture1D => UVec3::new(shrink(self.size.x), 1, 1),
            TextureUsage::Texture2D | TextureUsage::Multisample => {
                UVec3::new(shrink(self.size.x), shrink(self.size.y), 1)
            }
            TextureUsage::Texture2DArray => UVec3::new(shrink(self.size.x), shrink(self.size.y), self.size.z),
            TextureUsage::Texture3D => UVec3::new(shrink(self.size.x), shrink(self.size.y), shrink(self.size.z)),
        }
    }

    /// Bytes of tightly packed level-0 data
    pub fn byte_len(&self) -> usize {
        let texels = self.size.x as usize * self.size.y as usize * self.size.z as usize;
        self.format.info().bytes_per_pixel as usize * texels
    }

    fn validate(&self) -> BackendResult<()> {
        const OP: &str = "Texture::create";
        if self.size.min_element() == 0 {
            return Err(BackendError::invalid(OP, "texture extent must be non-zero"));
        }
        let flat = match self.usage {
            TextureUsage::Texture1D => self.size.y == 1 && self.size.z == 1,
            TextureUsage::Texture2D | TextureUsage::Multisample => self.size.z == 1,
            TextureUsage::Texture3D | TextureUsage::Texture2DArray => true,
        };
        if !flat {
            return Err(BackendError::invalid(OP, format!("{:?} extent {} has unused axes", self.usage, self.size)));
        }
        let max_levels = 32 - self.size.max_element().leading_zeros();
        if self.mip_levels == 0 || self.mip_levels > max_levels {
            return Err(BackendError::invalid(OP, format!("{} mip levels for extent {}", self.mip_levels, self.size)));
        }
        if self.usage == TextureUsage::Multisample && (self.samples == 0 || self.mip_levels != 1) {
            return Err(BackendError::invalid(OP, "multisample textures need samples and a single level"));
        }
        Ok(())
    }
}

/// Texture image with its sampler state applied
#[derive(Debug)]
pub struct Texture {
    handle: Owned<TextureKind>,
    desc: TextureDesc,
}

impl Texture {
    /// Create a texture and optionally upload its first level.
    ///
    /// `data` must hold exactly [`TextureDesc::byte_len`] bytes. Multisample
    /// textures can't be initialized from memory.
    pub fn create(ctx: &Context, desc: &TextureDesc, data: Option<&[u8]>) -> BackendResult<Self> {
        desc.validate()?;
        if let Some(data) = data {
            if desc.usage == TextureUsage::Multisample {
                return Err(BackendError::invalid("Texture::create", "multisample textures take no initial data"));
            }
            if data.len() != desc.byte_len() {
                return Err(BackendError::invalid(
                    "Texture::create",
                    format!("initial data is {} bytes, level 0 is {}", data.len(), desc.byte_len()),
                ));
            }
        }

        // Step 1: Allocate
        let handle = allocate::<TextureKind>(ctx.driver(), "glGenTextures", |d| d.gen_texture())?;
        let info = desc.format.info();

        // Step 2: Define every level, then apply the sampler
        {
            let bound = handle.bind(desc.usage.target())?;
            let driver = bound.driver();
            if desc.usage == TextureUsage::Multisample {
                driver.tex_image_multisample(bound.target(), desc.samples, info.internal, desc.size.truncate());
                check(driver, ErrorKind::Configuration, "glTexImage2DMultisample")?;
            } else {
                for level in 0..desc.mip_levels {
                    let pixels = if level == 0 { data } else { None };
                    driver.tex_image(
                        bound.target(),
                        level as i32,
                        info.internal,
                        desc.level_size(level),
                        info.layout,
                        info.component,
                        pixels,
                    );
                    check(driver, ErrorKind::Configuration, "glTexImage")?;
                }
                bound.apply_sampler(&desc.sampler)?;
            }
        }

        log::debug!(
            id = handle.id(),
            width = desc.size.x,
            height = desc.size.y;
            "Created {:?} {:?} texture", desc.usage, desc.format
        );
        Ok(Self { handle, desc: *desc })
    }

    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    pub fn size(&self) -> UVec3 {
        self.desc.size
    }

    pub fn target(&self) -> NativeEnum {
        self.desc.usage.target()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn destroy(mut self) -> BackendResult<()> {
        self.handle.reset()
    }
}
