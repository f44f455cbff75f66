// i18n.rs
//
// Runtime UI strings:
// - English is compiled in and is the fallback for every key
// - assets/i18n/<lang>.json ({ "key": "value" }) overrides it per language,
//   searched next to the executable first, then in the working directory
// - tr("key") / tr_with("key", [("name", ...)]) with {name} placeholders

use once_cell::sync::OnceCell;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

pub const FALLBACK_LANG: &str = "en";

const EMBEDDED_EN: &[(&str, &str)] = &[
    ("app.title", "Street View Bricks"),
    ("menu.file", "File"),
    ("menu.open_pack", "Open Panorama Pack..."),
    ("menu.reload", "Reload"),
    ("menu.exit", "Exit"),
    ("menu.view", "View"),
    ("menu.language", "Language"),
    ("view.reset", "Reset View"),
    ("status.loading", "Loading {percent}%"),
    ("status.ready", "Ready"),
    ("status.no_panorama", "No panorama"),
    ("status.pano_prefix", "Panorama:"),
    ("status.models", "Models: {count}"),
    ("status.links", "Nearby"),
    ("status.link", "Go to {description}"),
];

pub const LANGUAGES: [(&str, &str); 4] = [
    ("en", "English"),
    ("fr", "Français"),
    ("ja", "日本語"),
    ("zh-Hans", "简体中文"),
];

#[derive(Debug, Clone)]
pub struct I18n {
    pub lang: String,
    map: HashMap<String, String>,
    fallback_map: HashMap<String, String>,
}

impl I18n {
    fn new(lang: String, map: HashMap<String, String>) -> Self {
        let fallback_map = EMBEDDED_EN
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            lang,
            map,
            fallback_map,
        }
    }

    fn get(&self, key: &str) -> String {
        self.map
            .get(key)
            .or_else(|| self.fallback_map.get(key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

static I18N: OnceCell<RwLock<I18n>> = OnceCell::new();

fn load_json_map(path: &Path) -> Option<HashMap<String, String>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("cannot read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(m) => Some(m),
        Err(e) => {
            log::warn!("ignoring malformed {}: {}", path.display(), e);
            None
        }
    }
}

fn find_lang_file(lang: &str) -> Option<PathBuf> {
    let file = format!("{}.json", lang);
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    exe_dir
        .into_iter()
        .chain(std::iter::once(PathBuf::new()))
        .map(|dir| dir.join("assets").join("i18n").join(&file))
        .find(|p| p.exists())
}

/// Initialize global i18n. Later calls replace the active language.
pub fn init(lang: impl Into<String>) {
    let lang = lang.into();
    let map = find_lang_file(&lang)
        .and_then(|p| load_json_map(&p))
        .unwrap_or_default();
    if map.is_empty() && lang != FALLBACK_LANG {
        log::info!("no translations for {}, using {}", lang, FALLBACK_LANG);
    }

    let i = I18n::new(lang, map);
    if let Some(lock) = I18N.get() {
        if let Ok(mut w) = lock.write() {
            *w = i;
        }
    } else {
        let _ = I18N.set(RwLock::new(i));
    }
}

/// Localized text for `key`; the key itself if nothing has it.
pub fn tr(key: &str) -> String {
    match I18N.get().and_then(|l| l.read().ok()) {
        Some(i) => i.get(key),
        None => EMBEDDED_EN
            .iter()
            .find(|(k, _)| *k == key)
            .map_or_else(|| key.to_string(), |(_, v)| v.to_string()),
    }
}

/// `tr` plus `{name}` substitution. Unknown placeholders are left alone.
pub fn tr_with(key: &str, args: &[(&str, String)]) -> String {
    let mut s = tr(key);
    for (k, v) in args {
        s = s.replace(&format!("{{{}}}", k), v);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_then_fallback_then_key() {
        let mut map = HashMap::new();
        map.insert("menu.file".to_string(), "Fichier".to_string());
        let i = I18n::new("fr".into(), map);

        assert_eq!(i.get("menu.file"), "Fichier");
        assert_eq!(i.get("menu.view"), "View");
        assert_eq!(i.get("no.such.key"), "no.such.key");
    }

    #[test]
    fn placeholders_are_substituted() {
        assert_eq!(
            tr_with("status.loading", &[("percent", "50".to_string())]),
            "Loading 50%"
        );
        assert_eq!(tr_with("status.models", &[]), "Models: {count}");
    }

    #[test]
    fn reads_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ja.json");
        std::fs::write(&path, r#"{"menu.view": "表示"}"#).unwrap();
        let map = load_json_map(&path).unwrap();
        assert_eq!(map["menu.view"], "表示");

        std::fs::write(&path, "not json").unwrap();
        assert!(load_json_map(&path).is_none());
    }
}
