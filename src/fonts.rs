// fonts.rs - pick a UI font that covers the translated menus
//
// egui's bundled fonts have no CJK glyphs. We try a few well-known system
// locations plus ./assets next to the executable, and install the first file
// ab_glyph can parse as the primary proportional and monospace font.

use std::path::{Path, PathBuf};

const ASSET_FONTS: [&str; 4] = [
    "NotoSansCJK-Regular.ttc",
    "NotoSansSC-Regular.otf",
    "NotoSansJP-Regular.otf",
    "NotoSans-Regular.ttf",
];

fn system_candidates() -> Vec<PathBuf> {
    let list: &[&str] = if cfg!(windows) {
        &[
            r"C:\Windows\Fonts\msyh.ttf",
            r"C:\Windows\Fonts\simhei.ttf",
            r"C:\Windows\Fonts\meiryo.ttf",
            r"C:\Windows\Fonts\segoeui.ttf",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/System/Library/Fonts/Hiragino Sans GB.ttc",
            "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
            "/Library/Fonts/NotoSansCJK-Regular.ttc",
        ]
    } else {
        &[
            "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
            "/usr/share/fonts/truetype/noto/NotoSansCJK-Regular.ttc",
            "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
        ]
    };
    list.iter().map(PathBuf::from).collect()
}

fn candidates() -> Vec<PathBuf> {
    let mut out = system_candidates();
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    for dir in exe_dir.into_iter().chain(std::iter::once(PathBuf::new())) {
        out.extend(ASSET_FONTS.iter().map(|f| dir.join("assets").join(f)));
    }
    out
}

fn load(path: &Path) -> Option<Vec<u8>> {
    let bytes = std::fs::read(path).ok()?;
    // .ttc support in ab_glyph is spotty, so parse before trusting it
    ab_glyph::FontArc::try_from_vec(bytes.clone()).ok()?;
    Some(bytes)
}

pub fn install(ctx: &egui::Context) {
    let Some((path, bytes)) = candidates()
        .into_iter()
        .find_map(|p| load(&p).map(|b| (p, b)))
    else {
        log::warn!("no CJK-capable font found, translated labels may not render");
        return;
    };
    log::info!("UI font: {}", path.display());

    let mut fonts = egui::FontDefinitions::default();
    fonts
        .font_data
        .insert("ui".to_owned(), egui::FontData::from_owned(bytes));
    for family in [egui::FontFamily::Proportional, egui::FontFamily::Monospace] {
        if let Some(list) = fonts.families.get_mut(&family) {
            list.insert(0, "ui".to_owned());
        }
    }
    ctx.set_fonts(fonts);
}
