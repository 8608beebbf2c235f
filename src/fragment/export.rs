//! Diagnostic image export of a state's fragments

use crate::dom::BoundingBox;
use crate::error::{Result, StateError};
use crate::fragment::FragmentTree;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

const STATIC_COLOR: Rgba<u8> = Rgba([0, 160, 0, 255]);
const DYNAMIC_COLOR: Rgba<u8> = Rgba([220, 0, 0, 255]);

/// Intersect a page rectangle with the image bounds, in whole pixels
fn clamp_to_image(rect: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = rect.x.max(0.0).floor() as u32;
    let y0 = rect.y.max(0.0).floor() as u32;
    let x1 = (rect.right().max(0.0).ceil() as u32).min(width);
    let y1 = (rect.bottom().max(0.0).ceil() as u32).min(height);

    (x1 > x0 && y1 > y0).then(|| (x0, y0, x1 - x0, y1 - y0))
}

/// Write one cropped PNG per useful fragment to `<dir>/<state name>/<id>.png`
pub fn export_fragments(
    fragments: &FragmentTree,
    dir: &Path,
    state_name: &str,
    viewport: &DynamicImage,
) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(StateError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }

    let stem = Path::new(state_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| state_name.to_string());
    let target = dir.join(stem);
    fs::create_dir_all(&target)?;

    let (width, height) = viewport.dimensions();
    let mut written = Vec::new();
    for fragment in fragments.fragments().filter(|f| f.is_useful()) {
        let Some((x, y, w, h)) = clamp_to_image(&fragment.rect(), width, height) else {
            debug!("Fragment {} lies outside the viewport, not exported", fragment.id());
            continue;
        };
        let path = target.join(format!("{}.png", fragment.id()));
        viewport.crop_imm(x, y, w, h).save_with_format(&path, ImageFormat::Png)?;
        written.push(path);
    }

    info!("Exported {} fragments to {}", written.len(), target.display());
    Ok(written)
}

/// Save the viewport with every useful fragment outlined; dynamic fragments in red
pub fn export_overlay(fragments: &FragmentTree, viewport: &DynamicImage, path: &Path) -> Result<()> {
    let mut canvas = viewport.to_rgba8();
    let (width, height) = canvas.dimensions();

    for fragment in fragments.fragments().filter(|f| f.is_useful()) {
        let Some((x, y, w, h)) = clamp_to_image(&fragment.rect(), width, height) else {
            continue;
        };
        let color = if fragment.is_dynamic() { DYNAMIC_COLOR } else { STATIC_COLOR };
        draw_hollow_rect_mut(&mut canvas, Rect::at(x as i32, y as i32).of_size(w, h), color);
    }

    canvas.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
