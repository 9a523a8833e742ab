//! Reads plugin metadata out of an artifact's embedded manifest.
//!
//! Only manifest entries are read; nothing in the archive is extracted or run.

use std::{
    collections::BTreeMap,
    io::{Read, Seek},
    path::Path,
};

use serde::Deserialize;

use crate::error::{PluginError, PluginResult};

/// Upper bound on a manifest entry; real ones are a few KiB.
const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub api_version: Option<String>,
    pub depends: Vec<String>,
    pub soft_depends: Vec<String>,
    /// Archive entry the metadata came from, e.g. `plugin.yml`.
    pub manifest: String,
}

#[derive(Debug, Clone, Copy)]
enum ManifestKind {
    PaperYaml,
    BukkitYaml,
    VelocityJson,
    FabricJson,
    ForgeToml,
}

const MANIFESTS: &[(&str, ManifestKind)] = &[
    ("paper-plugin.yml", ManifestKind::PaperYaml),
    ("plugin.yml", ManifestKind::BukkitYaml),
    ("bungee.yml", ManifestKind::BukkitYaml),
    ("velocity-plugin.json", ManifestKind::VelocityJson),
    ("fabric.mod.json", ManifestKind::FabricJson),
    ("META-INF/mods.toml", ManifestKind::ForgeToml),
];

pub fn parse_file(path: &Path) -> PluginResult<PluginMetadata> {
    let f = std::fs::File::open(path)?;
    parse_reader(std::io::BufReader::new(f))
}

pub fn parse_reader<R: Read + Seek>(reader: R) -> PluginResult<PluginMetadata> {
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| PluginError::InvalidArchive(e.to_string()))?;

    for (entry, kind) in MANIFESTS {
        let raw = match archive.by_name(entry) {
            Ok(file) => {
                if file.size() > MAX_MANIFEST_BYTES {
                    return Err(PluginError::InvalidArchive(format!(
                        "{entry} is too large ({} bytes)",
                        file.size()
                    )));
                }
                let mut buf = Vec::new();
                file.take(MAX_MANIFEST_BYTES)
                    .read_to_end(&mut buf)
                    .map_err(|e| PluginError::InvalidArchive(format!("read {entry}: {e}")))?;
                buf
            }
            Err(zip::result::ZipError::FileNotFound) => continue,
            Err(e) => return Err(PluginError::InvalidArchive(e.to_string())),
        };
        let mut meta = match kind {
            ManifestKind::PaperYaml => parse_paper_yaml(&raw),
            ManifestKind::BukkitYaml => parse_bukkit_yaml(&raw),
            ManifestKind::VelocityJson => parse_velocity_json(&raw),
            ManifestKind::FabricJson => parse_fabric_json(&raw),
            ManifestKind::ForgeToml => parse_forge_toml(&raw),
        }
        .map_err(|msg| PluginError::MissingManifest(format!("{entry}: {msg}")))?;
        meta.manifest = entry.to_string();
        if meta.name.trim().is_empty() {
            return Err(PluginError::MissingManifest(format!(
                "{entry} does not declare a name"
            )));
        }
        if meta.version.trim().is_empty() {
            meta.version = "unknown".to_string();
        }
        return Ok(meta);
    }

    Err(PluginError::MissingManifest(
        "no plugin.yml, paper-plugin.yml, bungee.yml, velocity-plugin.json, fabric.mod.json or META-INF/mods.toml"
            .to_string(),
    ))
}

/// YAML scalars such as `version: 1.0` parse as numbers; keep them as text.
fn yaml_scalar(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_list(v: Option<&serde_yaml::Value>) -> Vec<String> {
    match v {
        Some(serde_yaml::Value::Sequence(items)) => items.iter().filter_map(yaml_scalar).collect(),
        Some(other) => yaml_scalar(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn yaml_mapping(raw: &[u8]) -> Result<serde_yaml::Mapping, String> {
    match serde_yaml::from_slice::<serde_yaml::Value>(raw).map_err(|e| e.to_string())? {
        serde_yaml::Value::Mapping(m) => Ok(m),
        _ => Err("manifest is not a mapping".to_string()),
    }
}

fn parse_bukkit_yaml(raw: &[u8]) -> Result<PluginMetadata, String> {
    let m = yaml_mapping(raw)?;
    let get = |k: &str| m.get(k);

    let mut authors = yaml_list(get("authors"));
    if let Some(author) = get("author").and_then(yaml_scalar) {
        authors.insert(0, author);
    }

    Ok(PluginMetadata {
        name: get("name").and_then(yaml_scalar).unwrap_or_default(),
        version: get("version").and_then(yaml_scalar).unwrap_or_default(),
        description: get("description").and_then(yaml_scalar),
        authors,
        api_version: get("api-version").and_then(yaml_scalar),
        depends: yaml_list(get("depend")),
        soft_depends: yaml_list(get("softdepend")),
        manifest: String::new(),
    })
}

fn parse_paper_yaml(raw: &[u8]) -> Result<PluginMetadata, String> {
    let mut meta = parse_bukkit_yaml(raw)?;
    let m = yaml_mapping(raw)?;

    // dependencies: { server: { Name: { required: bool } } }
    if let Some(serde_yaml::Value::Mapping(deps)) = m.get("dependencies") {
        let server = deps.get("server").and_then(|v| v.as_mapping());
        for (name, opts) in server.into_iter().flatten() {
            let Some(name) = yaml_scalar(name) else {
                continue;
            };
            let required = opts
                .get("required")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            if required {
                meta.depends.push(name);
            } else {
                meta.soft_depends.push(name);
            }
        }
    }
    Ok(meta)
}

#[derive(Debug, Deserialize)]
struct VelocityManifest {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    dependencies: Vec<VelocityDependency>,
}

#[derive(Debug, Deserialize)]
struct VelocityDependency {
    id: String,
    #[serde(default)]
    optional: bool,
}

fn parse_velocity_json(raw: &[u8]) -> Result<PluginMetadata, String> {
    let m: VelocityManifest = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    let (soft, hard): (Vec<_>, Vec<_>) = m.dependencies.into_iter().partition(|d| d.optional);
    Ok(PluginMetadata {
        name: m.name.unwrap_or(m.id),
        version: m.version.unwrap_or_default(),
        description: m.description,
        authors: m.authors,
        api_version: None,
        depends: hard.into_iter().map(|d| d.id).collect(),
        soft_depends: soft.into_iter().map(|d| d.id).collect(),
        manifest: String::new(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FabricAuthor {
    Name(String),
    Person { name: String },
}

#[derive(Debug, Deserialize)]
struct FabricManifest {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    authors: Vec<FabricAuthor>,
    #[serde(default)]
    depends: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    recommends: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    suggests: BTreeMap<String, serde_json::Value>,
}

fn parse_fabric_json(raw: &[u8]) -> Result<PluginMetadata, String> {
    let m: FabricManifest = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    Ok(PluginMetadata {
        name: m.name.unwrap_or(m.id),
        version: m.version.unwrap_or_default(),
        description: m.description,
        authors: m
            .authors
            .into_iter()
            .map(|a| match a {
                FabricAuthor::Name(n) | FabricAuthor::Person { name: n } => n,
            })
            .collect(),
        api_version: m
            .depends
            .get("minecraft")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        depends: m.depends.into_keys().collect(),
        soft_depends: m
            .recommends
            .into_keys()
            .chain(m.suggests.into_keys())
            .collect(),
        manifest: String::new(),
    })
}

#[derive(Debug, Deserialize)]
struct ForgeManifest {
    #[serde(default)]
    mods: Vec<ForgeMod>,
    #[serde(default)]
    dependencies: BTreeMap<String, Vec<ForgeDependency>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForgeMod {
    mod_id: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    authors: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForgeDependency {
    mod_id: String,
    #[serde(default)]
    mandatory: Option<bool>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    version_range: Option<String>,
}

fn parse_forge_toml(raw: &[u8]) -> Result<PluginMetadata, String> {
    let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
    let m: ForgeManifest = toml::from_str(text).map_err(|e| e.to_string())?;
    let first = m
        .mods
        .into_iter()
        .next()
        .ok_or_else(|| "no [[mods]] entry".to_string())?;

    let mut depends = Vec::new();
    let mut soft_depends = Vec::new();
    let mut api_version = None;
    for dep in m.dependencies.get(&first.mod_id).into_iter().flatten() {
        if dep.mod_id == "minecraft" {
            api_version = dep.version_range.clone();
        }
        let required = match (&dep.kind, dep.mandatory) {
            (Some(kind), _) => kind.eq_ignore_ascii_case("required"),
            (None, Some(mandatory)) => mandatory,
            (None, None) => true,
        };
        if required {
            depends.push(dep.mod_id.clone());
        } else {
            soft_depends.push(dep.mod_id.clone());
        }
    }

    Ok(PluginMetadata {
        name: first.display_name.unwrap_or(first.mod_id),
        version: first.version.unwrap_or_default(),
        description: first.description.map(|d| d.trim().to_string()),
        authors: first
            .authors
            .map(|a| {
                a.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        api_version,
        depends,
        soft_depends,
        manifest: String::new(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Cursor, Write};

    use super::*;

    fn parse_bytes(bytes: &[u8]) -> PluginResult<PluginMetadata> {
        parse_reader(Cursor::new(bytes))
    }

    pub(crate) fn jar_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, opts).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    pub(crate) fn plugin_jar(name: &str, version: &str) -> Vec<u8> {
        jar_with(&[
            (
                "plugin.yml",
                &format!("name: {name}\nversion: '{version}'\nmain: com.example.{name}\n"),
            ),
            ("com/example/Main.class", "\u{CA}\u{FE}"),
        ])
    }

    #[test]
    fn parses_bukkit_plugin_yml() {
        let jar = jar_with(&[(
            "plugin.yml",
            "name: Essentials\nversion: 1.0\nauthor: md_5\nauthors: [snowleo]\napi-version: '1.20'\ndepend: [Vault]\nsoftdepend: [LuckPerms, WorldGuard]\ndescription: Core commands\n",
        )]);
        let meta = parse_bytes(&jar).unwrap();
        assert_eq!(meta.name, "Essentials");
        assert_eq!(meta.version, "1.0");
        assert_eq!(meta.authors, vec!["md_5", "snowleo"]);
        assert_eq!(meta.api_version.as_deref(), Some("1.20"));
        assert_eq!(meta.depends, vec!["Vault"]);
        assert_eq!(meta.soft_depends, vec!["LuckPerms", "WorldGuard"]);
        assert_eq!(meta.description.as_deref(), Some("Core commands"));
        assert_eq!(meta.manifest, "plugin.yml");
    }

    #[test]
    fn paper_manifest_wins_over_plugin_yml() {
        let jar = jar_with(&[
            ("plugin.yml", "name: Legacy\nversion: 0.1\n"),
            (
                "paper-plugin.yml",
                "name: Modern\nversion: '2.1.0'\ndependencies:\n  server:\n    Vault:\n      required: true\n    PlaceholderAPI:\n      required: false\n",
            ),
        ]);
        let meta = parse_bytes(&jar).unwrap();
        assert_eq!(meta.name, "Modern");
        assert_eq!(meta.depends, vec!["Vault"]);
        assert_eq!(meta.soft_depends, vec!["PlaceholderAPI"]);
    }

    #[test]
    fn parses_fabric_mod_json() {
        let jar = jar_with(&[(
            "fabric.mod.json",
            r#"{"schemaVersion":1,"id":"lithium","version":"0.11.2","name":"Lithium",
               "authors":["jellysquid3",{"name":"2No2Name"}],
               "depends":{"fabricloader":">=0.14","minecraft":"1.20.x"},
               "suggests":{"sodium":"*"}}"#,
        )]);
        let meta = parse_bytes(&jar).unwrap();
        assert_eq!(meta.name, "Lithium");
        assert_eq!(meta.version, "0.11.2");
        assert_eq!(meta.authors, vec!["jellysquid3", "2No2Name"]);
        assert_eq!(meta.api_version.as_deref(), Some("1.20.x"));
        assert_eq!(meta.depends, vec!["fabricloader", "minecraft"]);
        assert_eq!(meta.soft_depends, vec!["sodium"]);
    }

    #[test]
    fn parses_forge_mods_toml() {
        let jar = jar_with(&[(
            "META-INF/mods.toml",
            r#"modLoader="javafml"
loaderVersion="[47,)"
[[mods]]
modId="spark"
version="1.10.53"
displayName="spark"
authors="Luck, others"
[[dependencies.spark]]
modId="minecraft"
mandatory=true
versionRange="[1.20.1,)"
[[dependencies.spark]]
modId="jei"
type="optional"
"#,
        )]);
        let meta = parse_bytes(&jar).unwrap();
        assert_eq!(meta.name, "spark");
        assert_eq!(meta.version, "1.10.53");
        assert_eq!(meta.authors, vec!["Luck", "others"]);
        assert_eq!(meta.depends, vec!["minecraft"]);
        assert_eq!(meta.soft_depends, vec!["jei"]);
        assert_eq!(meta.api_version.as_deref(), Some("[1.20.1,)"));
    }

    #[test]
    fn rejects_non_zip_bytes() {
        let err = parse_bytes(b"<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, PluginError::InvalidArchive(_)));
    }

    #[test]
    fn rejects_archive_without_manifest() {
        let jar = jar_with(&[("README.md", "hello")]);
        let err = parse_bytes(&jar).unwrap_err();
        assert!(matches!(err, PluginError::MissingManifest(_)));
    }

    #[test]
    fn rejects_manifest_without_name() {
        let jar = jar_with(&[("plugin.yml", "version: 1.0.0\n")]);
        let err = parse_bytes(&jar).unwrap_err();
        assert!(matches!(err, PluginError::MissingManifest(_)));
    }

    #[test]
    fn rejects_unparseable_manifest() {
        let jar = jar_with(&[("plugin.yml", "name: [unterminated\n")]);
        let err = parse_bytes(&jar).unwrap_err();
        assert!(matches!(err, PluginError::MissingManifest(_)));
    }
}
