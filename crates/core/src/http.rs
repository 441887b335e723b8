use crate::error::BackendError;
use reqwest::blocking::Response;
use url::Url;

/// Joins `path` below `base`, keeping any path prefix `base` already has.
pub(crate) fn endpoint_url(base: &str, path: &str) -> Result<Url, BackendError> {
    let mut base = Url::parse(base.trim())?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

pub(crate) fn ensure_success(backend: &str, response: Response) -> Result<Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(BackendError::BackendResponse {
        backend: backend.to_string(),
        details: format!("{status}: {}", body.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::endpoint_url;

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let url = endpoint_url("http://localhost:11434", "api/embed").unwrap();
        assert_eq!(url.as_str(), "http://localhost:11434/api/embed");

        let url = endpoint_url("http://gateway/ollama", "/api/generate").unwrap();
        assert_eq!(url.as_str(), "http://gateway/ollama/api/generate");
    }

    #[test]
    fn endpoint_rejects_garbage() {
        assert!(endpoint_url("not a url", "api").is_err());
    }
}
