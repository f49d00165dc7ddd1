use clockwork::resource::{FinalizeContext, LoadContext, Resource, ResourceResult};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use type_uuid::TypeUuid;

// What the content tools would write out for an image
#[derive(Serialize, Deserialize)]
pub struct GpuImageData {
    pub width: u32,
    pub height: u32,
    pub image_bytes: Vec<u8>,
}

// No real significance to this UUID, other than all resource types should have a unique UUID
#[derive(TypeUuid, Default)]
#[uuid = "3ebc8afd-09d2-427e-b9e9-50a53fcbde84"]
pub struct GpuImage {
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Resource for GpuImage {
    fn begin_load(
        &mut self,
        stream: &mut dyn Read,
        ctx: &LoadContext,
    ) -> ResourceResult<()> {
        let mut bytes = Vec::default();
        stream.read_to_end(&mut bytes)?;
        let data = bincode::deserialize::<GpuImageData>(&bytes)?;
        if data.image_bytes.len() != (data.width * data.height * 4) as usize {
            return Err(format!("{} has the wrong number of pixels", ctx.name()).into());
        }

        self.image_bytes = data.image_bytes;
        self.width = data.width;
        self.height = data.height;
        Ok(())
    }

    fn end_load(
        &mut self,
        ctx: &FinalizeContext,
    ) -> ResourceResult<()> {
        // A real renderer would upload to the GPU here, on the main thread
        log::debug!(
            "Upload {} ({}x{}) to the GPU",
            ctx.name(),
            self.width,
            self.height
        );
        Ok(())
    }

    fn memory_use(&self) -> usize {
        self.image_bytes.len()
    }
}

// A text file of "key: value" lines. Each "texture" line pulls in a GpuImage.
#[derive(TypeUuid, Default)]
#[uuid = "c6a2d3e5-5f4b-4f0e-8d61-2b7f5b1c9a10"]
pub struct Material {
    pub shader: String,
    pub texture_names: Vec<String>,
    pub textures: Vec<Arc<GpuImage>>,
}

impl Resource for Material {
    fn begin_load(
        &mut self,
        stream: &mut dyn Read,
        ctx: &LoadContext,
    ) -> ResourceResult<()> {
        let mut text = String::default();
        stream.read_to_string(&mut text)?;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim() {
                "shader" => self.shader = value.trim().to_string(),
                "texture" => {
                    let texture_name = value.trim();
                    ctx.request::<GpuImage>(texture_name);
                    self.texture_names.push(texture_name.to_string());
                }
                other => log::warn!("Unknown key {} in material {}", other, ctx.name()),
            }
        }

        Ok(())
    }

    fn end_load(
        &mut self,
        ctx: &FinalizeContext,
    ) -> ResourceResult<()> {
        for texture_name in &self.texture_names {
            match ctx.get_existing::<GpuImage>(texture_name) {
                Some(texture) => self.textures.push(texture),
                None => log::warn!("Material {} is missing texture {}", ctx.name(), texture_name),
            }
        }
        Ok(())
    }
}
