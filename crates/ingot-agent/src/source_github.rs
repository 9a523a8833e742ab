use serde::Deserialize;

use crate::{
    error::{PluginError, PluginResult},
    source::{Artifact, ResolvedArtifacts, fetch_json, is_archive_name},
};

#[derive(Debug, Clone)]
pub struct GithubApi {
    pub base: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubAsset {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    pub browser_download_url: String,
}

impl GithubApi {
    fn get(&self, client: &reqwest::Client, url: String) -> reqwest::RequestBuilder {
        let mut req = client
            .get(url)
            .header("accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Newest non-draft release; stable releases are preferred over pre-releases.
    pub async fn latest_release(
        &self,
        client: &reqwest::Client,
        owner: &str,
        repo: &str,
    ) -> PluginResult<GithubRelease> {
        let url = format!("{}/repos/{owner}/{repo}/releases?per_page=30", self.base);
        let releases: Vec<GithubRelease> =
            fetch_json(self.get(client, url), "github", &format!("{owner}/{repo} releases")).await?;
        pick_latest(releases).ok_or_else(|| {
            PluginError::NoCompatibleArtifact(format!("{owner}/{repo} has no published releases"))
        })
    }

    pub async fn tagged_release(
        &self,
        client: &reqwest::Client,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> PluginResult<GithubRelease> {
        let url = format!("{}/repos/{owner}/{repo}/releases/tags/{tag}", self.base);
        fetch_json(
            self.get(client, url),
            "github",
            &format!("{owner}/{repo} release {tag}"),
        )
        .await
    }
}

pub fn pick_latest(releases: Vec<GithubRelease>) -> Option<GithubRelease> {
    let mut published = releases.into_iter().filter(|r| !r.draft);
    let first = published.next()?;
    if !first.prerelease {
        return Some(first);
    }
    published.find(|r| !r.prerelease).or(Some(first))
}

fn is_plugin_asset(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    is_archive_name(&lower)
        && !lower.ends_with("-sources.jar")
        && !lower.ends_with("-javadoc.jar")
}

pub fn into_artifacts(
    release: GithubRelease,
) -> PluginResult<(Option<String>, ResolvedArtifacts)> {
    let version = release.tag_name.trim().trim_start_matches('v').to_string();
    let mut artifacts: Vec<Artifact> = release
        .assets
        .into_iter()
        .filter(|a| is_plugin_asset(&a.name))
        .map(|a| Artifact {
            filename: a.name,
            size: a.size,
            url: a.browser_download_url,
            sha1: None,
        })
        .collect();

    let label = release.name.unwrap_or(release.tag_name);
    match artifacts.len() {
        0 => Err(PluginError::NoCompatibleArtifact(format!(
            "release {label} has no .jar or .zip assets"
        ))),
        1 => Ok((Some(version), ResolvedArtifacts::Single(artifacts.remove(0)))),
        _ => Ok((
            Some(version),
            ResolvedArtifacts::Candidates {
                candidates: artifacts,
            },
        )),
    }
}
