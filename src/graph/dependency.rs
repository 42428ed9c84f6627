//! Setup-time checks over a pass list: read-after-write ordering within a
//! frame and sampler/format compatibility of every binding.

use std::collections::HashMap;

use super::pass::{PassDescriptor, ReadKind, Target, TextureBinding};
use crate::error::RenderError;
use crate::resources::{Filter, ResourceTable, TextureId};

/// Textures a pass renders into.
pub(crate) fn written_by(
    pass: &PassDescriptor,
    table: &ResourceTable,
) -> Result<Vec<TextureId>, RenderError> {
    match pass.target {
        Target::Default => Ok(Vec::new()),
        Target::Framebuffer(fb) => {
            let desc = table.framebuffer_desc(fb)?;
            Ok(desc.colors.iter().chain(desc.depth.iter()).copied().collect())
        }
    }
}

/// Checks that the declared order is a valid schedule of the frame's
/// read-after-write dependencies.
///
/// A same-frame read must come after the last pass writing the texture. A
/// previous-frame read must come before the first. No pass may sample a
/// texture it renders into.
pub fn validate_order(passes: &[PassDescriptor], table: &ResourceTable) -> Result<(), RenderError> {
    let writes = passes
        .iter()
        .map(|pass| written_by(pass, table))
        .collect::<Result<Vec<_>, _>>()?;

    let mut first_writer = HashMap::new();
    let mut last_writer = HashMap::new();
    for (index, textures) in writes.iter().enumerate() {
        for &texture in textures {
            first_writer.entry(texture).or_insert(index);
            last_writer.insert(texture, index);
        }
    }

    for (index, pass) in passes.iter().enumerate() {
        for binding in &pass.bindings {
            let texture = binding.texture;
            let violation = |reason: &str| RenderError::DependencyViolation {
                pass: pass.name.clone(),
                texture: texture_name(table, texture),
                reason: reason.to_string(),
            };

            if writes[index].contains(&texture) {
                return Err(violation("samples a texture it renders into"));
            }
            match binding.read {
                ReadKind::SameFrame => {
                    if let Some(&writer) = last_writer.get(&texture)
                        && writer > index
                    {
                        return Err(violation(&format!(
                            "reads before its last writer '{}'",
                            passes[writer].name
                        )));
                    }
                }
                ReadKind::PreviousFrame => {
                    if let Some(&writer) = first_writer.get(&texture)
                        && writer < index
                    {
                        return Err(violation(&format!(
                            "reads the previous frame after '{}' already wrote it",
                            passes[writer].name
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Checks every binding's sampler against its texture's format.
pub fn validate_bindings(
    passes: &[PassDescriptor],
    table: &ResourceTable,
) -> Result<(), RenderError> {
    for pass in passes {
        for binding in &pass.bindings {
            check_binding(pass, binding, table)?;
        }
        let mut units = pass.bindings.iter().map(|b| b.unit).collect::<Vec<_>>();
        units.sort_unstable();
        if units.windows(2).any(|w| w[0] == w[1]) {
            return Err(RenderError::InvalidParameter(format!(
                "pass '{}' binds two textures to the same unit",
                pass.name
            )));
        }
    }
    Ok(())
}

fn check_binding(
    pass: &PassDescriptor,
    binding: &TextureBinding,
    table: &ResourceTable,
) -> Result<(), RenderError> {
    let texture = table.texture_desc(binding.texture)?;
    let sampler = table.sampler_desc(binding.sampler)?;
    let incompatible = |reason: &str| {
        RenderError::creation(
            format!("{} in pass '{}'", texture.name, pass.name),
            format!("sampler '{}' {reason}", sampler.name),
        )
    };

    if texture.format.is_depth() {
        if sampler.compare.is_none() && sampler.filter != Filter::Nearest {
            return Err(incompatible(
                "must compare or filter nearest to read a depth texture",
            ));
        }
    } else {
        if sampler.compare.is_some() {
            return Err(incompatible("compares but the texture has no depth"));
        }
        if !texture.format.is_filterable() && sampler.filter != Filter::Nearest {
            return Err(incompatible("filters a non-filterable format"));
        }
    }
    Ok(())
}

fn texture_name(table: &ResourceTable, id: TextureId) -> String {
    table
        .texture_desc(id)
        .map(|desc| desc.name.clone())
        .unwrap_or_else(|_| format!("{id:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProgramId;
    use crate::graph::DrawSource;
    use crate::resources::{
        CompareFunc, Extent, SizeClass, SamplerId, TextureFormat, TextureKind, Wrap,
    };

    struct Fixture {
        table: ResourceTable,
        a: TextureId,
        b: TextureId,
        depth: TextureId,
        fb_a: Target,
        fb_b: Target,
        nearest: SamplerId,
        linear: SamplerId,
        shadow: SamplerId,
    }

    fn fixture() -> Fixture {
        let mut table = ResourceTable::new(Extent::new(64, 64));
        let size = SizeClass::Fixed(Extent::square(16));
        let a = table
            .declare("a", size, TextureFormat::Rgba32Float, TextureKind::D2)
            .unwrap();
        let b = table
            .declare("b", size, TextureFormat::Rgba8, TextureKind::D2)
            .unwrap();
        let depth = table
            .declare("depth", size, TextureFormat::Depth32Float, TextureKind::D2)
            .unwrap();
        let fb_a = table.declare_framebuffer("fb-a", &[a], None).unwrap();
        let fb_b = table.declare_framebuffer("fb-b", &[b], Some(depth)).unwrap();
        let nearest = table
            .declare_sampler("nearest", Filter::Nearest, Wrap::Clamp, None)
            .unwrap();
        let linear = table
            .declare_sampler("linear", Filter::Linear, Wrap::Clamp, None)
            .unwrap();
        let shadow = table
            .declare_sampler("shadow", Filter::Linear, Wrap::Clamp, Some(CompareFunc::LessEqual))
            .unwrap();
        Fixture {
            table,
            a,
            b,
            depth,
            fb_a: Target::Framebuffer(fb_a),
            fb_b: Target::Framebuffer(fb_b),
            nearest,
            linear,
            shadow,
        }
    }

    fn pass(name: &str, target: Target) -> PassDescriptor {
        PassDescriptor::new(name, ProgramId(0))
            .target(target)
            .draw(DrawSource::Fullscreen)
    }

    #[test]
    fn read_after_write_is_accepted() {
        let f = fixture();
        let passes = vec![
            pass("write-a", f.fb_a),
            pass("read-a", f.fb_b).bind(0, f.a, f.nearest),
            pass("present", Target::Default).bind(0, f.b, f.linear),
        ];
        validate_order(&passes, &f.table).unwrap();
        validate_bindings(&passes, &f.table).unwrap();
    }

    #[test]
    fn read_before_write_is_rejected() {
        let f = fixture();
        let passes = vec![
            pass("read-a", f.fb_b).bind(0, f.a, f.nearest),
            pass("write-a", f.fb_a),
        ];
        let err = validate_order(&passes, &f.table).unwrap_err();
        assert!(matches!(
            err,
            RenderError::DependencyViolation { ref pass, ref texture, .. }
                if pass == "read-a" && texture == "a"
        ));
    }

    #[test]
    fn history_read_must_precede_writers() {
        let f = fixture();
        let ok = vec![
            pass("history", f.fb_b).bind_previous(0, f.a, f.nearest),
            pass("write-a", f.fb_a),
        ];
        validate_order(&ok, &f.table).unwrap();

        let late = vec![
            pass("write-a", f.fb_a),
            pass("history", f.fb_b).bind_previous(0, f.a, f.nearest),
        ];
        assert!(matches!(
            validate_order(&late, &f.table),
            Err(RenderError::DependencyViolation { .. })
        ));
    }

    #[test]
    fn sampling_own_target_is_rejected() {
        let f = fixture();
        let passes = vec![pass("feedback", f.fb_b).bind(0, f.depth, f.nearest)];
        assert!(matches!(
            validate_order(&passes, &f.table),
            Err(RenderError::DependencyViolation { .. })
        ));
    }

    #[test]
    fn sampler_must_suit_format() {
        let f = fixture();
        let filtered_float = vec![pass("p", Target::Default).bind(0, f.a, f.linear)];
        assert!(matches!(
            validate_bindings(&filtered_float, &f.table),
            Err(RenderError::ResourceCreation { .. })
        ));

        let filtered_depth = vec![pass("p", Target::Default).bind(0, f.depth, f.linear)];
        assert!(validate_bindings(&filtered_depth, &f.table).is_err());

        let compared_colour = vec![pass("p", Target::Default).bind(0, f.b, f.shadow)];
        assert!(validate_bindings(&compared_colour, &f.table).is_err());

        let fine = vec![
            pass("p", Target::Default)
                .bind(0, f.depth, f.shadow)
                .bind(1, f.b, f.linear),
        ];
        validate_bindings(&fine, &f.table).unwrap();
    }

    #[test]
    fn duplicate_units_are_rejected() {
        let f = fixture();
        let passes = vec![
            pass("p", Target::Default)
                .bind(0, f.b, f.linear)
                .bind(0, f.a, f.nearest),
        ];
        assert!(matches!(
            validate_bindings(&passes, &f.table),
            Err(RenderError::InvalidParameter(_))
        ));
    }
}
