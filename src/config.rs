use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Every API url ends with this path.
pub(crate) const API_PATH_SUFFIX: &str = "/api/";
pub(crate) const TOKEN_LEN: usize = 32;
const RC_FILE_NAME: &str = ".redcaprc";

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// API endpoint, e.g. `https://redcap.example.edu/api/`.
    pub url: String,
    /// 32 character project API token.
    pub token: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    token: Option<String>,
    verify: Option<bool>,
}

pub(crate) fn load_config(
    url: Option<String>,
    token: Option<String>,
    verify: Option<bool>,
) -> Result<ProjectConfig> {
    let mut url = url.or_else(|| std::env::var("REDCAP_API_URL").ok());
    let mut token = token.or_else(|| std::env::var("REDCAP_API_TOKEN").ok());

    let rc_candidates = rc_candidates();
    let mut file_verify: Option<bool> = None;

    if url.is_none() || token.is_none() || verify.is_none() {
        if let Some(rc_path) = rc_candidates.iter().find(|p| p.exists()) {
            let cfg = read_rc(rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            })?;

            url = url.or(cfg.url);
            token = token.or(cfg.token);
            file_verify = cfg.verify;
        }
    }

    let searched = rc_candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let Some(url) = url else {
        bail!("Missing configuration: url (set REDCAP_API_URL or put `url:` in one of: {searched})");
    };
    let Some(token) = token else {
        bail!(
            "Missing configuration: token (set REDCAP_API_TOKEN or put `token:` in one of: {searched})"
        );
    };

    let verify = verify.or(file_verify).unwrap_or(true);

    Ok(ProjectConfig { url, token, verify })
}

/// Basic shape checks run before any request is built.
pub(crate) fn validate_url_and_token(url: &str, token: &str) -> crate::Result<()> {
    if !url.ends_with(API_PATH_SUFFIX) {
        return Err(Error::Precondition(format!(
            "incorrect url format '{url}', url must end with {API_PATH_SUFFIX}"
        )));
    }

    let len = token.chars().count();
    if len != TOKEN_LEN {
        return Err(Error::Precondition(format!(
            "incorrect token format, token must be {TOKEN_LEN} characters long (got {len})"
        )));
    }

    Ok(())
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // Support formatting where `token:` is on one line and the value is on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !is_key_line(line) {
                let v = strip_quotes(line).to_string();
                match pk {
                    "url" => cfg.url = Some(v),
                    _ => cfg.token = Some(v),
                }
                continue;
            }
        }

        // urls contain colons, so only the first one separates key from value
        if let Some((k, v)) = line.split_once(':') {
            let v = strip_quotes(v.trim());
            match k.trim() {
                "url" if v.is_empty() => pending_key = Some("url"),
                "url" => cfg.url = Some(v.to_string()),
                "token" if v.is_empty() => pending_key = Some("token"),
                "token" => cfg.token = Some(v.to_string()),
                "verify" if !v.is_empty() => cfg.verify = Some(v != "0"),
                _ => {}
            }
        }
    }

    cfg
}

fn is_key_line(line: &str) -> bool {
    line.split_once(':')
        .is_some_and(|(k, _)| matches!(k.trim(), "url" | "token" | "verify"))
}

/// Drops one pair of matching quotes, as written by hand-edited `.redcaprc` files.
fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    ['"', '\'']
        .iter()
        .find_map(|&q| s.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(s)
}

/// `REDCAP_RC` alone when set, otherwise the working directory then home.
fn rc_candidates() -> Vec<PathBuf> {
    if let Ok(p) = std::env::var("REDCAP_RC") {
        return vec![PathBuf::from(p)];
    }

    std::env::current_dir()
        .ok()
        .into_iter()
        .chain(dirs::home_dir())
        .map(|dir| dir.join(RC_FILE_NAME))
        .collect()
}
