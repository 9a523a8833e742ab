use reqwest::Url;

use crate::{
    config::AgentConfig,
    error::{PluginError, PluginResult},
    source_github, source_modrinth, version,
};

const ARCHIVE_EXTENSIONS: &[&str] = &[".jar", ".zip"];

const MANUAL_HOSTS: &[(&str, &str)] = &[
    (
        "spigotmc.org",
        "SpigotMC does not allow automated downloads. Download the jar in a browser, then paste its direct link or upload it to the plugins folder.",
    ),
    (
        "curseforge.com",
        "CurseForge requires an API key for downloads. Use the file's direct download link instead.",
    ),
    (
        "dev.bukkit.org",
        "BukkitDev pages are not resolvable. Open the Files tab and paste the direct download link.",
    ),
    (
        "hangar.papermc.io",
        "Hangar pages are not resolvable yet. Paste the direct download link of the version you want.",
    ),
];

/// Where a source URL points. Each variant carries what resolving it needs.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Direct { url: String },
    GithubLatest { owner: String, repo: String },
    GithubTag { owner: String, repo: String, tag: String },
    Modrinth { slug: String, version: Option<String> },
    ManualOnly { host: String, guidance: String },
}

impl SourceKind {
    /// Registry `source` value for plugins installed from this kind.
    pub fn origin(&self) -> PluginSource {
        match self {
            SourceKind::Direct { .. } => PluginSource::DirectUrl,
            SourceKind::GithubLatest { .. } | SourceKind::GithubTag { .. } => PluginSource::Github,
            SourceKind::Modrinth { .. } => PluginSource::Modrinth,
            SourceKind::ManualOnly { .. } => PluginSource::Manual,
        }
    }

    pub fn project_id(&self) -> Option<String> {
        match self {
            SourceKind::GithubLatest { owner, repo } | SourceKind::GithubTag { owner, repo, .. } => {
                Some(format!("{owner}/{repo}"))
            }
            SourceKind::Modrinth { slug, .. } => Some(slug.clone()),
            SourceKind::Direct { .. } | SourceKind::ManualOnly { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginSource {
    Github,
    Modrinth,
    DirectUrl,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Artifact {
    pub filename: String,
    pub size: Option<u64>,
    pub url: String,
    /// Hex sha1 when the origin publishes one.
    pub sha1: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedArtifacts {
    Single(Artifact),
    /// Several artifacts in one release; the caller picks one before submitting.
    Candidates { candidates: Vec<Artifact> },
    Manual { guidance: String },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResolvedSource {
    pub kind: SourceKind,
    pub origin_url: String,
    pub reported_version: Option<String>,
    pub artifacts: ResolvedArtifacts,
}

/// Classifies a user supplied URL. First match wins, in this order:
/// archive extension, GitHub latest, GitHub tag, Modrinth project, manual-only
/// host. Anything else is `UnrecognizedSource`.
pub fn classify(input: &str) -> PluginResult<SourceKind> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(PluginError::UnrecognizedSource("empty url".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| PluginError::UnrecognizedSource(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PluginError::UnrecognizedSource(format!(
            "{raw}: only http(s) urls are supported"
        )));
    }

    let path_lower = url.path().to_ascii_lowercase();
    if ARCHIVE_EXTENSIONS.iter().any(|ext| path_lower.ends_with(ext)) {
        return Ok(SourceKind::Direct {
            url: url.to_string(),
        });
    }

    let host = url
        .host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_ascii_lowercase();
    let segs: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    if host == "github.com" && segs.len() >= 2 {
        let owner = segs[0].to_string();
        let repo = segs[1].trim_end_matches(".git").to_string();
        match &segs[2..] {
            [] | ["releases"] | ["releases", "latest"] => {
                return Ok(SourceKind::GithubLatest { owner, repo });
            }
            ["releases", "tag", tag] => {
                return Ok(SourceKind::GithubTag {
                    owner,
                    repo,
                    tag: (*tag).to_string(),
                });
            }
            _ => {}
        }
    }

    if host == "modrinth.com"
        && let [kind, slug, rest @ ..] = segs.as_slice()
        && matches!(*kind, "plugin" | "mod" | "datapack" | "project")
    {
        let version = match rest {
            ["version", v, ..] => Some((*v).to_string()),
            _ => None,
        };
        return Ok(SourceKind::Modrinth {
            slug: (*slug).to_string(),
            version,
        });
    }

    if let Some((manual_host, guidance)) = MANUAL_HOSTS
        .iter()
        .find(|(h, _)| host == *h || host.ends_with(&format!(".{h}")))
    {
        return Ok(SourceKind::ManualOnly {
            host: (*manual_host).to_string(),
            guidance: (*guidance).to_string(),
        });
    }

    Err(PluginError::UnrecognizedSource(raw.to_string()))
}

/// Turns a URL into concrete download targets, calling origin APIs when the
/// URL is indirect.
#[derive(Clone)]
pub struct SourceResolver {
    client: reqwest::Client,
    github: source_github::GithubApi,
    modrinth: source_modrinth::ModrinthApi,
}

impl SourceResolver {
    pub fn new(client: reqwest::Client, config: &AgentConfig) -> Self {
        Self {
            github: source_github::GithubApi {
                base: config.github_api.clone(),
                token: config.github_token.clone(),
            },
            modrinth: source_modrinth::ModrinthApi {
                base: config.modrinth_api.clone(),
                loaders: config.loaders.clone(),
                game_version: config.game_version.clone(),
            },
            client,
        }
    }

    pub async fn resolve(&self, input: &str) -> PluginResult<ResolvedSource> {
        let kind = classify(input)?;
        let origin_url = input.trim().to_string();
        let (reported_version, artifacts) = match &kind {
            SourceKind::Direct { url } => {
                let filename = file_name_from_url(url);
                let version = version::guess_from_file_name(&filename);
                let artifact = Artifact {
                    filename,
                    size: None,
                    url: url.clone(),
                    sha1: None,
                };
                (version, ResolvedArtifacts::Single(artifact))
            }
            SourceKind::GithubLatest { owner, repo } => {
                let release = self.github.latest_release(&self.client, owner, repo).await?;
                source_github::into_artifacts(release)?
            }
            SourceKind::GithubTag { owner, repo, tag } => {
                let release = self.github.tagged_release(&self.client, owner, repo, tag).await?;
                source_github::into_artifacts(release)?
            }
            SourceKind::Modrinth { slug, version } => {
                let version = match version {
                    Some(v) => self.modrinth.version(&self.client, slug, v).await?,
                    None => self.modrinth.latest_version(&self.client, slug).await?,
                };
                source_modrinth::into_artifact(version)?
            }
            SourceKind::ManualOnly { guidance, .. } => (
                None,
                ResolvedArtifacts::Manual {
                    guidance: guidance.clone(),
                },
            ),
        };
        Ok(ResolvedSource {
            kind,
            origin_url,
            reported_version,
            artifacts,
        })
    }
}

/// Sends an origin API request and decodes the JSON body, mapping rate limits
/// and missing resources to their dedicated errors.
pub(crate) async fn fetch_json<T: serde::de::DeserializeOwned>(
    req: reqwest::RequestBuilder,
    origin: &str,
    what: &str,
) -> PluginResult<T> {
    let resp = req
        .send()
        .await
        .map_err(|e| PluginError::SourceUnavailable(format!("{origin}: request {what}: {e}")))?;
    if let Some(err) = status_error(resp.status(), resp.headers(), origin, what) {
        return Err(err);
    }
    resp.json::<T>()
        .await
        .map_err(|e| PluginError::SourceUnavailable(format!("{origin}: parse {what}: {e}")))
}

pub(crate) fn status_error(
    status: reqwest::StatusCode,
    headers: &reqwest::header::HeaderMap,
    origin: &str,
    what: &str,
) -> Option<PluginError> {
    if status.is_success() {
        return None;
    }
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    let exhausted = header_u64("x-ratelimit-remaining") == Some(0);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || (status == reqwest::StatusCode::FORBIDDEN && exhausted)
    {
        let reset_at_unix = header_u64("x-ratelimit-reset").or_else(|| {
            header_u64("retry-after").map(|secs| crate::now_unix_ms() / 1000 + secs)
        });
        return Some(PluginError::RateLimited {
            origin: origin.to_string(),
            reset_at_unix,
        });
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Some(PluginError::NoCompatibleArtifact(format!(
            "{origin}: {what} not found"
        )));
    }
    Some(PluginError::SourceUnavailable(format!(
        "{origin}: {what} returned {status}"
    )))
}

pub fn file_name_from_url(url: &str) -> String {
    let path = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .unwrap_or_default();
    let decoded = urlencoding::decode(&path)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| path.clone());
    sanitize_file_name(&decoded).unwrap_or_else(|| "plugin.jar".to_string())
}

/// Keeps a single path component; rejects traversal and empty names.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let name = name.trim_start_matches('.').to_string();
    if name.is_empty() {
        return None;
    }
    Some(name)
}

pub(crate) fn is_archive_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_extension_wins_over_host_rules() {
        let kind =
            classify("https://github.com/EssentialsX/Essentials/releases/download/2.20.1/EssentialsX-2.20.1.jar")
                .unwrap();
        assert!(matches!(kind, SourceKind::Direct { .. }));

        let kind = classify("https://cdn.modrinth.com/data/abc/versions/def/Chunky-1.4.10.JAR").unwrap();
        assert!(matches!(kind, SourceKind::Direct { .. }));
    }

    #[test]
    fn github_latest_and_tag() {
        assert_eq!(
            classify("https://github.com/EssentialsX/Essentials/releases/latest").unwrap(),
            SourceKind::GithubLatest {
                owner: "EssentialsX".into(),
                repo: "Essentials".into()
            }
        );
        assert_eq!(
            classify("https://github.com/LuckPerms/LuckPerms").unwrap(),
            SourceKind::GithubLatest {
                owner: "LuckPerms".into(),
                repo: "LuckPerms".into()
            }
        );
        assert_eq!(
            classify("https://github.com/EssentialsX/Essentials/releases/tag/2.20.1").unwrap(),
            SourceKind::GithubTag {
                owner: "EssentialsX".into(),
                repo: "Essentials".into(),
                tag: "2.20.1".into()
            }
        );
    }

    #[test]
    fn github_non_release_paths_are_unrecognized() {
        let err = classify("https://github.com/EssentialsX/Essentials/issues/12").unwrap_err();
        assert!(matches!(err, PluginError::UnrecognizedSource(_)));
    }

    #[test]
    fn modrinth_project_and_pinned_version() {
        assert_eq!(
            classify("https://modrinth.com/plugin/chunky").unwrap(),
            SourceKind::Modrinth {
                slug: "chunky".into(),
                version: None
            }
        );
        assert_eq!(
            classify("https://modrinth.com/plugin/chunky/version/1.4.10").unwrap(),
            SourceKind::Modrinth {
                slug: "chunky".into(),
                version: Some("1.4.10".into())
            }
        );
    }

    #[test]
    fn manual_hosts_return_guidance() {
        let kind = classify("https://www.spigotmc.org/resources/vault.34315/").unwrap();
        match kind {
            SourceKind::ManualOnly { host, guidance } => {
                assert_eq!(host, "spigotmc.org");
                assert!(guidance.contains("browser"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_and_malformed_inputs_are_rejected() {
        for input in ["", "not a url", "ftp://example.com/x.jar", "https://example.com/page"] {
            let err = classify(input).unwrap_err();
            assert!(matches!(err, PluginError::UnrecognizedSource(_)), "{input}");
        }
    }

    #[tokio::test]
    async fn direct_links_resolve_without_network() {
        let cfg = AgentConfig::from_lookup(|_| None);
        let resolver = SourceResolver::new(reqwest::Client::new(), &cfg);
        let resolved = resolver
            .resolve("https://example.com/files/plugin-2.0.0.jar")
            .await
            .unwrap();
        assert_eq!(resolved.reported_version.as_deref(), Some("2.0.0"));
        match resolved.artifacts {
            ResolvedArtifacts::Single(a) => {
                assert_eq!(a.filename, "plugin-2.0.0.jar");
                assert_eq!(a.url, "https://example.com/files/plugin-2.0.0.jar");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rate_limits_are_distinguished() {
        use reqwest::header::{HeaderMap, HeaderValue};

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));
        let err = status_error(reqwest::StatusCode::FORBIDDEN, &headers, "github", "releases").unwrap();
        assert!(matches!(
            err,
            PluginError::RateLimited {
                reset_at_unix: Some(1_700_000_000),
                ..
            }
        ));

        let err = status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), "modrinth", "versions")
            .unwrap();
        assert!(matches!(err, PluginError::RateLimited { reset_at_unix: None, .. }));

        let err = status_error(reqwest::StatusCode::FORBIDDEN, &HeaderMap::new(), "github", "releases").unwrap();
        assert!(matches!(err, PluginError::SourceUnavailable(_)));

        let err = status_error(reqwest::StatusCode::NOT_FOUND, &HeaderMap::new(), "github", "release v9").unwrap();
        assert!(matches!(err, PluginError::NoCompatibleArtifact(_)));

        assert!(status_error(reqwest::StatusCode::OK, &HeaderMap::new(), "github", "x").is_none());
    }

    #[test]
    fn file_names_are_decoded_and_sanitized() {
        assert_eq!(
            file_name_from_url("https://example.com/a/My%20Plugin-1.0.jar"),
            "My Plugin-1.0.jar"
        );
        assert_eq!(file_name_from_url("https://example.com/a/..%2F..%2Fevil.jar"), "_.._evil.jar");
        assert_eq!(sanitize_file_name(".."), None);
    }
}
