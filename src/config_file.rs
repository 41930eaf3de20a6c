//! Generic config file loader; the format is chosen by the file name
//! extension.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigBackend {
    Json5,
    Yaml,
    Hcl,
}

impl ConfigBackend {
    pub fn decode_str<T: DeserializeOwned>(self, s: &str) -> Result<T> {
        match self {
            ConfigBackend::Json5 => serde_json5::from_str(s).map_err(|e| anyhow!("{e}")),
            ConfigBackend::Yaml => Ok(serde_yml::from_str(s)?),
            ConfigBackend::Hcl => Ok(hcl::from_str(s)?),
        }
    }

    pub fn load_config_file<T: DeserializeOwned>(self, path: &Path) -> Result<T> {
        let s = std::fs::read_to_string(path)
            .with_context(|| anyhow!("loading config file from {path:?}"))?;
        self.decode_str(&s)
            .with_context(|| anyhow!("decoding {self:?} from config file {path:?}"))
    }
}

pub const FILE_EXTENSIONS: &[(&str, ConfigBackend)] = &[
    ("json5", ConfigBackend::Json5),
    ("json", ConfigBackend::Json5),
    ("yml", ConfigBackend::Yaml),
    ("yaml", ConfigBackend::Yaml),
    ("hcl", ConfigBackend::Hcl),
];

pub fn backend_from_path(path: &Path) -> Result<ConfigBackend> {
    let Some(ext) = path.extension() else {
        bail!(
            "given file path does not have an extension \
             for determining the file type: {path:?}"
        )
    };
    let Some(ext) = ext.to_str() else {
        bail!("given file path does have an extension that is not unicode: {path:?}")
    };
    if let Some((_, backend)) = FILE_EXTENSIONS.iter().find(|(e, _b)| *e == ext) {
        Ok(*backend)
    } else {
        bail!("given file path does have an unknown extension {ext:?}: {path:?}")
    }
}

pub fn load_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    backend_from_path(path)?.load_config_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_backend_from_path() {
        assert_eq!(
            backend_from_path(Path::new("a/b.json5")).unwrap(),
            ConfigBackend::Json5
        );
        assert_eq!(
            backend_from_path(Path::new("b.yml")).unwrap(),
            ConfigBackend::Yaml
        );
        assert_eq!(
            backend_from_path(Path::new("b.hcl")).unwrap(),
            ConfigBackend::Hcl
        );
        assert!(backend_from_path(Path::new("b.toml")).is_err());
        assert!(backend_from_path(Path::new("config")).is_err());
    }
}
