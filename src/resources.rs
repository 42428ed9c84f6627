//! Declarative registry of the textures, framebuffers and samplers the pass
//! graph renders into and samples from.
//!
//! Resources are declared by logical name during setup, then realized on a
//! [`RenderBackend`] in one go. After that the table is sealed: further
//! declarations fail, and the only allocation it ever triggers again is
//! [`ResourceTable::resize`], which recreates screen-sized textures (and the
//! framebuffers that use them) with their declared formats. Fixed-size
//! resources such as shadow maps and the height field are never touched by a
//! resize.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::backend::RenderBackend;
use crate::error::RenderError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerId(pub usize);

/// Size of a texture in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }
}

/// How a texture's size is determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    /// Fixed at declaration time.
    Fixed(Extent),
    /// Follows the window's framebuffer size.
    Screen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit sRGB colour, filterable.
    Rgba8,
    /// Half-float colour, filterable.
    Rgba16Float,
    /// Full-float colour, only sampled with nearest filtering.
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    /// Whether linear filtering may be used when sampling this format.
    pub fn is_filterable(self) -> bool {
        matches!(self, TextureFormat::Rgba8 | TextureFormat::Rgba16Float)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
}

impl TextureKind {
    pub fn layers(self) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub name: String,
    pub size: SizeClass,
    pub format: TextureFormat,
    pub kind: TextureKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub name: String,
    pub colors: Vec<TextureId>,
    pub depth: Option<TextureId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wrap {
    Clamp,
    Repeat,
}

/// Depth comparison, used both by depth tests and by shadow samplers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplerDesc {
    pub name: String,
    pub filter: Filter,
    pub wrap: Wrap,
    pub compare: Option<CompareFunc>,
}

/// Name-indexed store of resource descriptors.
#[derive(Debug, Default)]
pub struct ResourceTable {
    textures: Vec<TextureDesc>,
    framebuffers: Vec<FramebufferDesc>,
    samplers: Vec<SamplerDesc>,
    texture_names: HashMap<String, TextureId>,
    framebuffer_names: HashMap<String, FramebufferId>,
    sampler_names: HashMap<String, SamplerId>,
    screen: Extent,
    sealed: bool,
}

impl ResourceTable {
    pub fn new(screen: Extent) -> Self {
        Self {
            screen,
            ..Default::default()
        }
    }

    /// Declares a texture. Declaring the same name again with an identical
    /// description returns the existing id; a different description is an error.
    pub fn declare(
        &mut self,
        name: &str,
        size: SizeClass,
        format: TextureFormat,
        kind: TextureKind,
    ) -> Result<TextureId, RenderError> {
        if let SizeClass::Fixed(extent) = size
            && (extent.width == 0 || extent.height == 0)
        {
            return Err(RenderError::InvalidParameter(format!(
                "texture '{name}' has zero size"
            )));
        }
        if kind == TextureKind::Cube && size == SizeClass::Screen {
            return Err(RenderError::InvalidParameter(format!(
                "cube texture '{name}' cannot follow the screen size"
            )));
        }

        let desc = TextureDesc {
            name: name.to_string(),
            size,
            format,
            kind,
        };
        if let Some(&id) = self.texture_names.get(name) {
            return self.redeclared(name, &self.textures[id.0] == &desc, id);
        }
        self.ensure_open(name)?;

        let id = TextureId(self.textures.len());
        self.textures.push(desc);
        self.texture_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declares a framebuffer over previously declared textures. All
    /// attachments must share one size.
    pub fn declare_framebuffer(
        &mut self,
        name: &str,
        colors: &[TextureId],
        depth: Option<TextureId>,
    ) -> Result<FramebufferId, RenderError> {
        if colors.is_empty() && depth.is_none() {
            return Err(RenderError::InvalidParameter(format!(
                "framebuffer '{name}' has no attachments"
            )));
        }
        for &color in colors {
            let desc = self.texture_desc(color)?;
            if desc.format.is_depth() || desc.kind != TextureKind::D2 {
                return Err(RenderError::InvalidParameter(format!(
                    "'{}' cannot be a colour attachment of '{name}'",
                    desc.name
                )));
            }
        }
        if let Some(depth) = depth {
            let desc = self.texture_desc(depth)?;
            if !desc.format.is_depth() {
                return Err(RenderError::InvalidParameter(format!(
                    "'{}' is not a depth format and cannot be the depth attachment of '{name}'",
                    desc.name
                )));
            }
        }
        let mut sizes = colors.iter().chain(depth.iter()).map(|&t| self.textures[t.0].size);
        if let Some(first) = sizes.next()
            && sizes.any(|s| s != first)
        {
            return Err(RenderError::InvalidParameter(format!(
                "attachments of framebuffer '{name}' differ in size"
            )));
        }

        let desc = FramebufferDesc {
            name: name.to_string(),
            colors: colors.to_vec(),
            depth,
        };
        if let Some(&id) = self.framebuffer_names.get(name) {
            return self.redeclared(name, &self.framebuffers[id.0] == &desc, id);
        }
        self.ensure_open(name)?;

        let id = FramebufferId(self.framebuffers.len());
        self.framebuffers.push(desc);
        self.framebuffer_names.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn declare_sampler(
        &mut self,
        name: &str,
        filter: Filter,
        wrap: Wrap,
        compare: Option<CompareFunc>,
    ) -> Result<SamplerId, RenderError> {
        let desc = SamplerDesc {
            name: name.to_string(),
            filter,
            wrap,
            compare,
        };
        if let Some(&id) = self.sampler_names.get(name) {
            return self.redeclared(name, &self.samplers[id.0] == &desc, id);
        }
        self.ensure_open(name)?;

        let id = SamplerId(self.samplers.len());
        self.samplers.push(desc);
        self.sampler_names.insert(name.to_string(), id);
        Ok(id)
    }

    fn redeclared<T>(&self, name: &str, identical: bool, id: T) -> Result<T, RenderError> {
        if identical {
            Ok(id)
        } else {
            Err(RenderError::InvalidParameter(format!(
                "'{name}' is already declared with a different description"
            )))
        }
    }

    fn ensure_open(&self, name: &str) -> Result<(), RenderError> {
        if self.sealed {
            return Err(RenderError::creation(
                name,
                "resource table is sealed after realization",
            ));
        }
        Ok(())
    }

    /// Creates every declared resource on `backend` and seals the table.
    pub fn realize(&mut self, backend: &mut impl RenderBackend) -> Result<(), RenderError> {
        for (index, desc) in self.textures.iter().enumerate() {
            let extent = self.resolve(desc.size);
            debug!(
                "Creating texture '{}' {}x{} {:?}",
                desc.name, extent.width, extent.height, desc.format
            );
            backend.create_texture(TextureId(index), desc, extent)?;
        }
        for (index, desc) in self.samplers.iter().enumerate() {
            backend.create_sampler(SamplerId(index), desc)?;
        }
        for index in 0..self.framebuffers.len() {
            backend.create_framebuffer(FramebufferId(index), self)?;
        }
        backend.resize_default_target(self.screen)?;
        self.sealed = true;
        info!(
            textures = self.textures.len(),
            framebuffers = self.framebuffers.len(),
            samplers = self.samplers.len(),
            "Realized render resources"
        );
        Ok(())
    }

    /// Recreates screen-sized textures and their framebuffers at the new size.
    /// Returns the recreated textures; a zero or unchanged size recreates nothing.
    pub fn resize(
        &mut self,
        backend: &mut impl RenderBackend,
        screen: Extent,
    ) -> Result<Vec<TextureId>, RenderError> {
        if screen.width == 0 || screen.height == 0 || screen == self.screen {
            return Ok(Vec::new());
        }
        self.screen = screen;

        let recreated = self.screen_textures().collect::<Vec<_>>();
        for &id in &recreated {
            backend.create_texture(id, &self.textures[id.0], screen)?;
        }
        for (index, fb) in self.framebuffers.iter().enumerate() {
            let uses_screen = fb.colors.iter().chain(fb.depth.iter()).any(|t| recreated.contains(t));
            if uses_screen {
                backend.create_framebuffer(FramebufferId(index), self)?;
            }
        }
        backend.resize_default_target(screen)?;
        debug!(
            "Resized {} screen textures to {}x{}",
            recreated.len(),
            screen.width,
            screen.height
        );
        Ok(recreated)
    }

    fn screen_textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.textures
            .iter()
            .enumerate()
            .filter(|(_, desc)| desc.size == SizeClass::Screen)
            .map(|(index, _)| TextureId(index))
    }

    fn resolve(&self, size: SizeClass) -> Extent {
        match size {
            SizeClass::Fixed(extent) => extent,
            SizeClass::Screen => self.screen,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn screen(&self) -> Extent {
        self.screen
    }

    pub fn texture(&self, name: &str) -> Result<TextureId, RenderError> {
        self.texture_names
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::UnknownResource(name.to_string()))
    }

    pub fn framebuffer(&self, name: &str) -> Result<FramebufferId, RenderError> {
        self.framebuffer_names
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::UnknownResource(name.to_string()))
    }

    pub fn sampler(&self, name: &str) -> Result<SamplerId, RenderError> {
        self.sampler_names
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::UnknownResource(name.to_string()))
    }

    pub fn texture_desc(&self, id: TextureId) -> Result<&TextureDesc, RenderError> {
        self.textures
            .get(id.0)
            .ok_or_else(|| RenderError::UnknownResource(format!("texture #{}", id.0)))
    }

    pub fn framebuffer_desc(&self, id: FramebufferId) -> Result<&FramebufferDesc, RenderError> {
        self.framebuffers
            .get(id.0)
            .ok_or_else(|| RenderError::UnknownResource(format!("framebuffer #{}", id.0)))
    }

    pub fn sampler_desc(&self, id: SamplerId) -> Result<&SamplerDesc, RenderError> {
        self.samplers
            .get(id.0)
            .ok_or_else(|| RenderError::UnknownResource(format!("sampler #{}", id.0)))
    }

    /// Current size of a texture.
    pub fn texture_extent(&self, id: TextureId) -> Result<Extent, RenderError> {
        Ok(self.resolve(self.texture_desc(id)?.size))
    }

    /// Current size of a framebuffer's attachments.
    pub fn framebuffer_extent(&self, id: FramebufferId) -> Result<Extent, RenderError> {
        let fb = self.framebuffer_desc(id)?;
        let first = fb
            .colors
            .first()
            .or(fb.depth.as_ref())
            .copied()
            .ok_or_else(|| RenderError::UnknownResource(fb.name.clone()))?;
        self.texture_extent(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Command, RecordingBackend};

    fn table() -> ResourceTable {
        ResourceTable::new(Extent::new(800, 600))
    }

    #[test]
    fn new_table_starts_empty_at_screen_size() {
        let table = ResourceTable::new(Extent::new(800, 600));
        assert_eq!(table.screen(), Extent::new(800, 600));
        assert!(!table.is_sealed());
        assert!(table.texture("anything").is_err());
        assert_eq!(ResourceTable::default().screen(), Extent::default());
    }

    #[test]
    fn declarations_are_idempotent() {
        let mut table = table();
        let size = SizeClass::Fixed(Extent::square(64));
        let a = table
            .declare("heightmap-ping", size, TextureFormat::Rgba32Float, TextureKind::D2)
            .unwrap();
        let b = table
            .declare("heightmap-ping", size, TextureFormat::Rgba32Float, TextureKind::D2)
            .unwrap();
        assert_eq!(a, b);

        let conflict = table.declare("heightmap-ping", size, TextureFormat::Rgba8, TextureKind::D2);
        assert!(matches!(conflict, Err(RenderError::InvalidParameter(_))));

        let s1 = table.declare_sampler("shadow", Filter::Nearest, Wrap::Clamp, Some(CompareFunc::Less));
        let s2 = table.declare_sampler("shadow", Filter::Nearest, Wrap::Clamp, Some(CompareFunc::Less));
        assert_eq!(s1.unwrap(), s2.unwrap());
    }

    #[test]
    fn framebuffer_attachments_are_checked() {
        let mut table = table();
        let color = table
            .declare("color", SizeClass::Screen, TextureFormat::Rgba8, TextureKind::D2)
            .unwrap();
        let depth = table
            .declare("depth", SizeClass::Screen, TextureFormat::Depth32Float, TextureKind::D2)
            .unwrap();
        let small_depth = table
            .declare(
                "small-depth",
                SizeClass::Fixed(Extent::square(16)),
                TextureFormat::Depth32Float,
                TextureKind::D2,
            )
            .unwrap();

        assert!(table.declare_framebuffer("scene", &[color], Some(depth)).is_ok());
        assert!(table.declare_framebuffer("swapped", &[depth], Some(color)).is_err());
        assert!(table.declare_framebuffer("mixed", &[color], Some(small_depth)).is_err());
        assert!(table.declare_framebuffer("empty", &[], None).is_err());
        assert_eq!(table.framebuffer_extent(table.framebuffer("scene").unwrap()).unwrap(), Extent::new(800, 600));
    }

    #[test]
    fn sealed_table_rejects_new_declarations() {
        let mut table = table();
        let mut backend = RecordingBackend::new();
        table
            .declare("a", SizeClass::Screen, TextureFormat::Rgba8, TextureKind::D2)
            .unwrap();
        table.realize(&mut backend).unwrap();
        assert!(table.is_sealed());
        // Re-declaring an existing resource identically is still fine.
        assert!(table.declare("a", SizeClass::Screen, TextureFormat::Rgba8, TextureKind::D2).is_ok());
        assert!(matches!(
            table.declare("b", SizeClass::Screen, TextureFormat::Rgba8, TextureKind::D2),
            Err(RenderError::ResourceCreation { .. })
        ));
    }

    #[test]
    fn resize_only_recreates_screen_resources() {
        let mut table = table();
        let mut backend = RecordingBackend::new();
        let shadow = table
            .declare(
                "shadowmap",
                SizeClass::Fixed(Extent::square(2048)),
                TextureFormat::Depth32Float,
                TextureKind::D2,
            )
            .unwrap();
        let scene = table
            .declare("scene", SizeClass::Screen, TextureFormat::Rgba8, TextureKind::D2)
            .unwrap();
        let shadow_fb = table.declare_framebuffer("shadow-fb", &[], Some(shadow)).unwrap();
        let scene_fb = table.declare_framebuffer("scene-fb", &[scene], None).unwrap();
        table.realize(&mut backend).unwrap();
        backend.take_commands();

        let recreated = table.resize(&mut backend, Extent::new(1024, 768)).unwrap();
        assert_eq!(recreated, vec![scene]);
        assert_eq!(table.texture_extent(scene).unwrap(), Extent::new(1024, 768));
        assert_eq!(table.texture_extent(shadow).unwrap(), Extent::square(2048));

        let commands = backend.take_commands();
        assert!(commands.contains(&Command::CreateTexture(scene, Extent::new(1024, 768))));
        assert!(commands.contains(&Command::CreateFramebuffer(scene_fb)));
        assert!(!commands.contains(&Command::CreateFramebuffer(shadow_fb)));
        assert!(!commands.iter().any(|c| matches!(c, Command::CreateTexture(t, _) if *t == shadow)));

        // Same size again is a no-op.
        assert!(table.resize(&mut backend, Extent::new(1024, 768)).unwrap().is_empty());
        assert!(table.resize(&mut backend, Extent::new(0, 768)).unwrap().is_empty());
    }

    #[test]
    fn unknown_names_are_reported() {
        let table = table();
        assert_eq!(
            table.texture("missing"),
            Err(RenderError::UnknownResource("missing".into()))
        );
    }
}
