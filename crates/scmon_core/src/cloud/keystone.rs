use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::discovery::{discovery_candidates, has_version_entries, parse_version_document};
use super::{CloudCredentials, CloudError, CloudSession, DiscoveryOutcome};
use crate::catalog::{CatalogEntry, Endpoint};

const SUBJECT_TOKEN: &str = "X-Subject-Token";
const AUTH_TOKEN: &str = "X-Auth-Token";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Session scoped to one project, authenticated once with a password.
#[derive(Debug)]
pub struct KeystoneSession {
    client: Client,
    token: String,
    project_id: String,
    catalog: Vec<CatalogEntry>,
    identity_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token: Token,
}

#[derive(Debug, Deserialize)]
struct Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
    #[serde(default)]
    project: Option<ProjectRef>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RegionList {
    #[serde(default)]
    regions: Vec<RegionRef>,
}

#[derive(Debug, Deserialize)]
struct RegionRef {
    id: String,
}

impl KeystoneSession {
    pub fn authenticate(creds: &CloudCredentials) -> Result<Self, CloudError> {
        Self::authenticate_with_timeout(creds, DEFAULT_TIMEOUT)
    }

    pub fn authenticate_with_timeout(
        creds: &CloudCredentials,
        timeout: Duration,
    ) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| CloudError::Http {
                url: creds.auth_url.clone(),
                source,
            })?;
        Self::login(client, creds)
    }

    fn login(client: Client, creds: &CloudCredentials) -> Result<Self, CloudError> {
        let url = format!("{}/auth/tokens", identity_v3_base(&creds.auth_url));
        info!(target: "scmon.keystone", %url, user = %creds.username, "authenticating");
        let response = client
            .post(&url)
            .json(&password_auth_body(creds))
            .send()
            .map_err(|source| CloudError::Http {
                url: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(CloudError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        let token = response
            .headers()
            .get(SUBJECT_TOKEN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or(CloudError::MalformedToken(SUBJECT_TOKEN))?;
        let body: Value = response.json().map_err(|source| CloudError::Http {
            url: url.clone(),
            source,
        })?;
        let (catalog, project_id) = parse_token_body(body)?;
        let identity_url = identity_endpoint(&catalog, creds.region_name.as_deref())
            .unwrap_or_else(|| creds.auth_url.clone());

        Ok(Self {
            client,
            token,
            project_id,
            catalog,
            identity_url,
        })
    }

    /// GET `url` as JSON. Any status other than 2xx or 300 is an error and
    /// the body is left unread.
    fn get_json(&self, url: &str) -> Result<Value, CloudError> {
        let response = self
            .client
            .get(url)
            .header(AUTH_TOKEN, &self.token)
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|source| CloudError::Http {
                url: url.to_owned(),
                source,
            })?;
        let status = response.status();
        // Version listings commonly answer 300 Multiple Choices.
        if !(status.is_success() || status == StatusCode::MULTIPLE_CHOICES) {
            return Err(CloudError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        response.json().map_err(|source| CloudError::Http {
            url: url.to_owned(),
            source,
        })
    }
}

impl CloudSession for KeystoneSession {
    fn service_catalog(&self) -> Result<Vec<CatalogEntry>, CloudError> {
        Ok(self.catalog.clone())
    }

    fn regions(&self) -> Result<Vec<String>, CloudError> {
        let url = format!("{}/regions", identity_v3_base(&self.identity_url));
        let body = self.get_json(&url)?;
        let list: RegionList =
            serde_json::from_value(body).map_err(|_| CloudError::MalformedResponse("regions"))?;
        Ok(list.regions.into_iter().map(|r| r.id).collect())
    }

    fn current_project_id(&self) -> &str {
        &self.project_id
    }

    /// Tries the catalog URL first, then the unscoped and root URLs until one
    /// answers with version entries. Endpoint data is always derived against
    /// the catalog URL.
    fn discover(&self, service_type: &str, endpoint: &Endpoint) -> DiscoveryOutcome {
        let mut without_versions = None;
        let mut first_failure = None;
        for candidate in discovery_candidates(&endpoint.url, &self.project_id) {
            debug!(target: "scmon.keystone", service_type, url = %candidate, "fetching version document");
            match self.get_json(&candidate) {
                Ok(body) if has_version_entries(&body) => {
                    return DiscoveryOutcome::Discovered(parse_version_document(
                        &body,
                        &endpoint.url,
                    ));
                }
                Ok(body) => {
                    without_versions.get_or_insert(body);
                }
                Err(err) => {
                    debug!(target: "scmon.keystone", url = %candidate, error = %err, "no version document");
                    first_failure.get_or_insert_with(|| match err {
                        CloudError::Status { status, .. } => format!("status {status}"),
                        other => other.to_string(),
                    });
                }
            }
        }
        match (without_versions, first_failure) {
            (Some(body), _) => {
                DiscoveryOutcome::Discovered(parse_version_document(&body, &endpoint.url))
            }
            (None, reason) => {
                DiscoveryOutcome::failed(reason.unwrap_or_else(|| "no version document".into()))
            }
        }
    }
}

fn password_auth_body(creds: &CloudCredentials) -> Value {
    let project = match (&creds.project_id, &creds.project_name) {
        (Some(id), _) => json!({ "id": id }),
        (None, name) => json!({
            "name": name,
            "domain": { "name": creds.project_domain_name },
        }),
    };
    json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": creds.username,
                        "password": creds.password,
                        "domain": { "name": creds.user_domain_name },
                    }
                }
            },
            "scope": { "project": project }
        }
    })
}

fn parse_token_body(body: Value) -> Result<(Vec<CatalogEntry>, String), CloudError> {
    let parsed: TokenBody =
        serde_json::from_value(body).map_err(|_| CloudError::MalformedToken("token"))?;
    let project = parsed
        .token
        .project
        .ok_or(CloudError::MalformedToken("token.project"))?;
    Ok((parsed.token.catalog, project.id))
}

/// Public identity endpoint, preferring the configured region.
fn identity_endpoint(catalog: &[CatalogEntry], region: Option<&str>) -> Option<String> {
    let endpoints: Vec<&Endpoint> = catalog
        .iter()
        .filter(|e| e.service_type == "identity")
        .flat_map(|e| e.endpoints.iter())
        .filter(|ep| ep.interface.as_deref().map_or(true, |i| i == "public"))
        .collect();
    region
        .and_then(|r| endpoints.iter().find(|ep| ep.region_id == r))
        .or_else(|| endpoints.first())
        .map(|ep| ep.url.clone())
}

fn identity_v3_base(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/v3") {
        trimmed.to_owned()
    } else {
        format!("{trimmed}/v3")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::EndpointData;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn creds() -> CloudCredentials {
        CloudCredentials {
            auth_url: "https://iam.example/v3".into(),
            username: "qa".into(),
            password: "secret".into(),
            project_id: None,
            project_name: Some("eu-de".into()),
            user_domain_name: "OTC0001".into(),
            project_domain_name: "OTC0001".into(),
            region_name: Some("eu-de".into()),
        }
    }

    #[test]
    fn auth_body_scopes_by_name_with_domain() {
        let body = password_auth_body(&creds());
        assert_eq!(
            json!({"name": "eu-de", "domain": {"name": "OTC0001"}}),
            body["auth"]["scope"]["project"]
        );
        assert_eq!("qa", body["auth"]["identity"]["password"]["user"]["name"]);
    }

    #[test]
    fn auth_body_prefers_project_id() {
        let mut c = creds();
        c.project_id = Some("p1".into());
        let body = password_auth_body(&c);
        assert_eq!(json!({"id": "p1"}), body["auth"]["scope"]["project"]);
    }

    #[test]
    fn token_body_yields_catalog_and_project() {
        let body = json!({"token": {
            "project": {"id": "abc123", "name": "eu-de"},
            "catalog": [{"type": "identity", "id": "s1", "endpoints": [
                {"region_id": "eu-de", "interface": "public", "url": "https://iam.example/v3"}
            ]}]
        }});
        let (catalog, project) = parse_token_body(body).unwrap();
        assert_eq!("abc123", project);
        assert_eq!(
            Some("https://iam.example/v3".to_string()),
            identity_endpoint(&catalog, Some("eu-nl"))
        );
    }

    #[test]
    fn unscoped_token_is_rejected() {
        let err = parse_token_body(json!({"token": {"catalog": []}})).unwrap_err();
        assert!(matches!(err, CloudError::MalformedToken("token.project")));
    }

    #[test]
    fn v3_base_is_idempotent() {
        assert_eq!("https://iam.example/v3", identity_v3_base("https://iam.example/v3/"));
        assert_eq!("https://iam.example/v3", identity_v3_base("https://iam.example"));
    }

    /// Canned answer: status, extra headers, body.
    type Reply = (u16, Vec<(&'static str, String)>, String);

    /// Minimal HTTP/1.1 server on a loopback port. Unrouted paths get a 404
    /// with an HTML body; every request is recorded as "METHOD path" along
    /// with its `X-Auth-Token` header.
    struct FixtureServer {
        base: String,
        seen: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    impl FixtureServer {
        fn start(routes: impl FnOnce(&str) -> Vec<(&'static str, Reply)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let routes: HashMap<String, Reply> = routes(&base)
                .into_iter()
                .map(|(path, reply)| (path.to_owned(), reply))
                .collect();
            let seen = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&seen);
            thread::spawn(move || {
                for stream in listener.incoming().flatten() {
                    answer(stream, &routes, &log);
                }
            });
            Self { base, seen }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base)
        }

        fn requests(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
        }

        fn tokens(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    fn answer(
        stream: TcpStream,
        routes: &HashMap<String, Reply>,
        log: &Mutex<Vec<(String, Option<String>)>>,
    ) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).is_err() {
            return;
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_owned();
        let target = parts.next().unwrap_or_default();
        let path = target.split('?').next().unwrap_or_default().to_owned();

        let mut content_length = 0;
        let mut token = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                } else if name.eq_ignore_ascii_case(AUTH_TOKEN) {
                    token = Some(value.trim().to_owned());
                }
            }
        }
        let mut body = vec![0; content_length];
        let _ = reader.read_exact(&mut body);
        log.lock().unwrap().push((format!("{method} {path}"), token));

        let (status, headers, payload) = routes.get(&path).cloned().unwrap_or_else(|| {
            (
                404,
                vec![("Content-Type", "text/html".to_owned())],
                "<html><body>Not Found</body></html>".to_owned(),
            )
        });
        let mut response = format!(
            "HTTP/1.1 {status} Fixture\r\nContent-Length: {}\r\nConnection: close\r\n",
            payload.len()
        );
        for (name, value) in headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str("\r\n");
        response.push_str(&payload);
        let mut stream = stream;
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();
    }

    fn json_reply(status: u16, body: Value) -> Reply {
        (
            status,
            vec![("Content-Type", "application/json".to_owned())],
            body.to_string(),
        )
    }

    fn direct_client() -> Client {
        Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn session(server: &FixtureServer) -> KeystoneSession {
        KeystoneSession {
            client: direct_client(),
            token: "tok-1".into(),
            project_id: "abc123".into(),
            catalog: Vec::new(),
            identity_url: server.url("/v3"),
        }
    }

    fn endpoint(url: String) -> Endpoint {
        Endpoint::new("eu-de", url)
    }

    fn volume_versions(base: &str) -> Value {
        json!({"versions": [
            {"id": "v2.0", "status": "CURRENT",
             "links": [{"rel": "self", "href": format!("{base}/v2/")}]},
            {"id": "v1.0", "status": "SUPPORTED",
             "links": [{"rel": "self", "href": format!("{base}/v1/")}]}
        ]})
    }

    #[test]
    fn discover_reads_success_document() {
        let server = FixtureServer::start(|base| {
            vec![(
                "/v3",
                json_reply(
                    200,
                    json!({"version": {"id": "v3.14", "status": "stable",
                        "links": [{"rel": "self", "href": format!("{base}/v3/")}]}}),
                ),
            )]
        });
        let outcome = session(&server).discover("identity", &endpoint(server.url("/v3")));
        assert_eq!(
            DiscoveryOutcome::Discovered(EndpointData {
                service_url: Some(server.url("/v3")),
                catalog_url: Some(server.url("/v3")),
            }),
            outcome
        );
        assert_eq!(vec!["GET /v3"], server.requests());
        assert_eq!(vec![Some("tok-1".to_string())], server.tokens());
    }

    #[test]
    fn discover_accepts_multiple_choices() {
        let server = FixtureServer::start(|base| {
            vec![(
                "/",
                json_reply(
                    300,
                    json!({"versions": {"values": [
                        {"id": "v3.14", "status": "stable",
                         "links": [{"rel": "self", "href": format!("{base}/v3/")}]}
                    ]}}),
                ),
            )]
        });
        let outcome = session(&server).discover("identity", &endpoint(server.url("/")));
        assert!(outcome.supports_discovery());
        assert_eq!(
            server.url("/v3"),
            outcome.resolved_url(&endpoint(server.url("/")))
        );
    }

    #[test]
    fn discover_falls_back_to_unscoped_then_root() {
        let server = FixtureServer::start(|base| vec![("/", json_reply(200, volume_versions(base)))]);
        let catalog_url = server.url("/v2/abc123");
        let outcome = session(&server).discover("volumev2", &endpoint(catalog_url.clone()));
        assert_eq!(
            DiscoveryOutcome::Discovered(EndpointData {
                service_url: Some(catalog_url.clone()),
                catalog_url: Some(catalog_url),
            }),
            outcome
        );
        assert_eq!(vec!["GET /v2/abc123", "GET /v2", "GET /"], server.requests());
    }

    #[test]
    fn discover_skips_documents_without_versions() {
        let server = FixtureServer::start(|base| {
            vec![
                ("/v2/abc123", json_reply(200, json!({"volumes": []}))),
                ("/v2", json_reply(200, volume_versions(base))),
            ]
        });
        let catalog_url = server.url("/v2/abc123");
        let endpoint = endpoint(catalog_url.clone());
        let outcome = session(&server).discover("volumev2", &endpoint);
        assert!(outcome.supports_discovery());
        assert_eq!(catalog_url, outcome.resolved_url(&endpoint));
        assert_eq!(vec!["GET /v2/abc123", "GET /v2"], server.requests());
    }

    #[test]
    fn discover_reports_not_found() {
        let server = FixtureServer::start(|_| Vec::new());
        let outcome = session(&server).discover("dns", &endpoint(server.url("/v2")));
        assert_eq!(DiscoveryOutcome::failed("status 404"), outcome);
        assert_eq!(vec!["GET /v2", "GET /"], server.requests());
    }

    #[test]
    fn discover_reports_non_json_body() {
        let server = FixtureServer::start(|_| {
            vec![(
                "/v2",
                (
                    200,
                    vec![("Content-Type", "text/html".to_owned())],
                    "<html>dashboard</html>".to_owned(),
                ),
            )]
        });
        let catalog_url = server.url("/v2");
        let outcome = session(&server).discover("dns", &endpoint(catalog_url.clone()));
        match outcome {
            DiscoveryOutcome::Failed { reason } => {
                assert!(reason.starts_with(&format!("http request to {catalog_url}")), "{reason}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn regions_lists_ids_with_token() {
        let server = FixtureServer::start(|_| {
            vec![(
                "/v3/regions",
                json_reply(200, json!({"regions": [{"id": "eu-de"}, {"id": "eu-nl"}]})),
            )]
        });
        assert_eq!(vec!["eu-de", "eu-nl"], session(&server).regions().unwrap());
        assert_eq!(vec![Some("tok-1".to_string())], server.tokens());
    }

    #[test]
    fn regions_status_wins_over_html_body() {
        let server = FixtureServer::start(|_| Vec::new());
        let err = session(&server).regions().unwrap_err();
        assert!(matches!(err, CloudError::Status { status: 404, .. }), "{err}");

        let server = FixtureServer::start(|_| {
            vec![(
                "/v3/regions",
                (403, Vec::new(), "<html>Forbidden</html>".to_owned()),
            )]
        });
        let err = session(&server).regions().unwrap_err();
        assert!(matches!(err, CloudError::Status { status: 403, .. }), "{err}");
    }

    #[test]
    fn regions_malformed_body_is_reported() {
        let server = FixtureServer::start(|_| {
            vec![("/v3/regions", json_reply(200, json!({"regions": "eu-de"})))]
        });
        let err = session(&server).regions().unwrap_err();
        assert!(matches!(err, CloudError::MalformedResponse("regions")), "{err}");
    }

    fn server_creds(server: &FixtureServer) -> CloudCredentials {
        CloudCredentials {
            auth_url: server.url("/v3"),
            ..creds()
        }
    }

    #[test]
    fn authenticate_takes_token_from_header() {
        let server = FixtureServer::start(|base| {
            vec![
                (
                    "/v3/auth/tokens",
                    (
                        201,
                        vec![
                            (SUBJECT_TOKEN, "tok-42".to_owned()),
                            ("Content-Type", "application/json".to_owned()),
                        ],
                        json!({"token": {
                            "project": {"id": "abc123"},
                            "catalog": [{"type": "identity", "id": "s1", "endpoints": [
                                {"region_id": "eu-de", "interface": "public",
                                 "url": format!("{base}/v3")}
                            ]}]
                        }})
                        .to_string(),
                    ),
                ),
                (
                    "/v3/regions",
                    json_reply(200, json!({"regions": [{"id": "eu-de"}]})),
                ),
            ]
        });
        let session = KeystoneSession::login(direct_client(), &server_creds(&server)).unwrap();
        assert_eq!("abc123", session.current_project_id());
        assert_eq!(1, session.service_catalog().unwrap().len());
        assert_eq!(vec!["eu-de"], session.regions().unwrap());
        assert_eq!(vec!["POST /v3/auth/tokens", "GET /v3/regions"], server.requests());
        assert_eq!(
            vec![None, Some("tok-42".to_string())],
            server.tokens()
        );
    }

    #[test]
    fn authenticate_rejects_failed_login() {
        let server = FixtureServer::start(|_| {
            vec![(
                "/v3/auth/tokens",
                json_reply(401, json!({"error": {"code": 401}})),
            )]
        });
        let err = KeystoneSession::login(direct_client(), &server_creds(&server)).unwrap_err();
        assert!(matches!(err, CloudError::Status { status: 401, .. }), "{err}");
    }

    #[test]
    fn authenticate_requires_subject_token_header() {
        let server = FixtureServer::start(|_| {
            vec![(
                "/v3/auth/tokens",
                json_reply(201, json!({"token": {"project": {"id": "abc123"}}})),
            )]
        });
        let err = KeystoneSession::login(direct_client(), &server_creds(&server)).unwrap_err();
        assert!(matches!(err, CloudError::MalformedToken(SUBJECT_TOKEN)), "{err}");
    }
}
