use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    error::{PluginError, PluginResult},
    source::{Artifact, ResolvedArtifacts, fetch_json},
};

#[derive(Debug, Clone)]
pub struct ModrinthApi {
    pub base: String,
    pub loaders: Vec<String>,
    pub game_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModrinthVersion {
    pub id: String,
    pub version_number: String,
    #[serde(default)]
    pub files: Vec<ModrinthFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModrinthFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub primary: Option<bool>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

impl ModrinthApi {
    /// Newest version of a project compatible with the configured loaders.
    pub async fn latest_version(
        &self,
        client: &reqwest::Client,
        slug: &str,
    ) -> PluginResult<ModrinthVersion> {
        let mut query = Vec::new();
        if !self.loaders.is_empty() {
            query.push(("loaders", serde_json::to_string(&self.loaders)?));
        }
        if let Some(gv) = &self.game_version {
            query.push(("game_versions", serde_json::to_string(&[gv])?));
        }
        let req = client
            .get(format!("{}/project/{slug}/version", self.base))
            .query(&query);
        let versions: Vec<ModrinthVersion> =
            fetch_json(req, "modrinth", &format!("project {slug} versions")).await?;
        versions.into_iter().next().ok_or_else(|| {
            PluginError::NoCompatibleArtifact(format!(
                "modrinth project {slug} has no versions for loaders [{}]{}",
                self.loaders.join(", "),
                self.game_version
                    .as_deref()
                    .map(|gv| format!(" on {gv}"))
                    .unwrap_or_default()
            ))
        })
    }

    /// A pinned version of a project. `version` may be a version id or a
    /// version number.
    pub async fn version(
        &self,
        client: &reqwest::Client,
        slug: &str,
        version: &str,
    ) -> PluginResult<ModrinthVersion> {
        let req = client.get(self.version_url(slug, version));
        fetch_json(req, "modrinth", &format!("{slug} version {version}")).await
    }

    fn version_url(&self, slug: &str, version: &str) -> String {
        format!(
            "{}/project/{}/version/{}",
            self.base,
            urlencoding::encode(slug),
            urlencoding::encode(version)
        )
    }
}

pub fn into_artifact(
    version: ModrinthVersion,
) -> PluginResult<(Option<String>, ResolvedArtifacts)> {
    let mut files = version.files;
    files.sort_by_key(|f| !f.primary.unwrap_or(false));
    let file = files.into_iter().next().ok_or_else(|| {
        PluginError::NoCompatibleArtifact(format!(
            "modrinth version {} has no files",
            version.id
        ))
    })?;
    let sha1 = file.hashes.get("sha1").map(|h| h.to_ascii_lowercase());
    Ok((
        Some(version.version_number),
        ResolvedArtifacts::Single(Artifact {
            filename: file.filename,
            size: file.size,
            url: file.url,
            sha1,
        }),
    ))
}
