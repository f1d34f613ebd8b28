// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Error, Settings,
    api::{
        DATASET_TYPE, Dataset, DatasetID, EventContext, Group, GroupID, Image, ImageID,
        LoginResult, Roi, Shape,
    },
    service::ObjectService,
};
use log::{Level, debug, error, log_enabled, trace};
use reqwest::{
    Method, StatusCode,
    header::{HeaderValue, REFERER},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::HashMap, time::Duration};
use url::Url;

/// Page size used for list endpoints, the server's maximum.
const PAGE_LIMIT: usize = 500;

/// Default OMERO.web address when no server is configured.
const DEFAULT_SERVER: &str = "http://localhost:4080/";

/// Builds the OMERO.web base URL from a host name or URL. A bare host is
/// assumed to be served over HTTPS. The result always ends with a slash so
/// relative endpoint paths join below it.
pub(crate) fn base_url(host: &str) -> Result<Url, Error> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::Validation("server host is required".to_string()));
    }

    let mut url = if host.contains("://") {
        Url::parse(host)?
    } else {
        Url::parse(&format!("https://{}", host))?
    };

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Deserialize)]
struct ObjectEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ListMeta {
    #[serde(rename = "totalCount")]
    total_count: Option<usize>,
}

#[derive(Deserialize)]
struct ListEnvelope<T> {
    data: Vec<T>,
    meta: Option<ListMeta>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct ApiVersion {
    version: String,
}

#[derive(Deserialize)]
struct PathNode {
    #[serde(rename = "type")]
    kind: String,
    id: u64,
}

#[derive(Deserialize)]
struct PathsResult {
    #[serde(default)]
    paths: Vec<Vec<PathNode>>,
}

/// Every dataset found on the paths from the top of the hierarchy to the
/// image, in path order. The server returns one path per parent.
fn parents_from_paths(paths: &PathsResult) -> Vec<DatasetID> {
    let mut parents = Vec::new();
    for node in paths.paths.iter().flatten() {
        let id = DatasetID::from(node.id);
        if node.kind == "dataset" && !parents.contains(&id) {
            parents.push(id);
        }
    }
    parents
}

#[derive(Serialize)]
struct NewDataset<'a> {
    #[serde(rename = "@type")]
    kind: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
}

#[derive(Deserialize)]
struct LinkResult {
    #[serde(default = "default_success")]
    success: bool,
}

fn default_success() -> bool {
    true
}

/// Client for an OMERO.web server's JSON API.
///
/// The client holds the HTTP connection pool, the session cookie store and
/// the CSRF token required for write requests. It is built unauthenticated
/// with [`Client::new`] and [`with_server`][Self::with_server], then
/// authenticated with [`with_login`][Self::with_login].
///
/// # Examples
///
/// ```no_run
/// use omero_replace::{Client, ImageID, ObjectService};
///
/// # async fn example() -> Result<(), omero_replace::Error> {
/// let client = Client::new()?
///     .with_server("omero.example.org")?
///     .with_login("alice", "secret")
///     .await?;
///
/// if let Some(image) = client.image(ImageID::from(10)).await? {
///     println!("Image {} is in datasets {:?}", image.id(), image.parents());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    url: Url,
    server_id: u64,
    csrf: String,
    context: Option<EventContext>,
    group: Option<GroupID>,
    closed: bool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url.as_str())
            .field("server_id", &self.server_id)
            .field("logged_in", &self.context.is_some())
            .field("group", &self.group)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Client {
    /// Create a new unauthenticated client for the default local server.
    ///
    /// The request timeout is read from `OMERO_TIMEOUT` (seconds, default
    /// 30).
    pub fn new() -> Result<Self, Error> {
        Self::with_timeout_secs(Settings::default().effective_timeout())
    }

    /// Create a new unauthenticated client with the given request timeout.
    pub fn with_timeout_secs(timeout_secs: u64) -> Result<Self, Error> {
        debug!("HTTP client configuration - timeout={}s", timeout_secs);

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_secs))
            .cookie_store(true)
            .build()?;

        Ok(Client {
            http,
            url: Url::parse(DEFAULT_SERVER)?,
            server_id: 1,
            csrf: String::new(),
            context: None,
            group: None,
            closed: false,
        })
    }

    /// Returns a new client pointed at the given OMERO.web server.
    ///
    /// The host may be a full URL (`https://omero.example.org/omero/`) or a
    /// bare host name, which is reached over HTTPS. Any existing login is
    /// dropped since sessions are specific to a server.
    pub fn with_server(&self, host: &str) -> Result<Self, Error> {
        Ok(Client {
            url: base_url(host)?,
            csrf: String::new(),
            context: None,
            group: None,
            closed: false,
            ..self.clone()
        })
    }

    /// Returns a new client that logs into the OMERO server with the given
    /// index in the web server's server list (default 1).
    pub fn with_server_id(self, server_id: u64) -> Self {
        Client { server_id, ..self }
    }

    /// Returns a new client authenticated with the provided username and
    /// password. The session starts in the user's default group.
    ///
    /// Any failure, including an unreachable server, is reported as
    /// [`Error::Authentication`].
    pub async fn with_login(&self, username: &str, password: &str) -> Result<Self, Error> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::Authentication(
                "username and password are required".to_string(),
            ));
        }

        let csrf = self
            .get::<ObjectEnvelope<String>>("api/v0/token/", &[])
            .await
            .map_err(|e| Error::Authentication(e.to_string()))?
            .data;

        let server = self.server_id.to_string();
        let form = [
            ("server", server.as_str()),
            ("username", username),
            ("password", password),
        ];

        let res = self
            .http
            .post(self.url.join("api/v0/login/")?)
            .header("X-CSRFToken", &csrf)
            .header(REFERER, self.referer())
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Authentication(e.to_string()))?;

        let status = res.status();
        let body = res
            .bytes()
            .await
            .map_err(|e| Error::Authentication(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Authentication(error_message(status, &body)));
        }

        let login: LoginResult = serde_json::from_slice(&body)
            .map_err(|e| Error::Authentication(format!("unexpected login response: {}", e)))?;
        let context = match (login.success, login.event_context) {
            (true, Some(context)) => context,
            _ => return Err(Error::Authentication(error_message(status, &body))),
        };

        debug!(
            "Logged into {} as {} (user {}, group {})",
            self.url, context.user_name, context.user_id, context.group_id
        );

        Ok(Client {
            csrf,
            group: Some(context.group_id),
            context: Some(context),
            closed: false,
            ..self.clone()
        })
    }

    /// Returns the base URL of the OMERO.web server.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Returns the username of the logged in user.
    pub fn username(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.user_name.as_str())
    }

    /// Returns the group queries are currently scoped to.
    pub fn group(&self) -> Option<GroupID> {
        self.group
    }

    /// Return the JSON API version offered by the server. Does not require
    /// authentication.
    pub async fn version(&self) -> Result<String, Error> {
        let versions: ListEnvelope<ApiVersion> = self.get("api/", &[]).await?;
        versions
            .data
            .into_iter()
            .map(|v| v.version)
            .max()
            .ok_or(Error::InvalidResponse)
    }

    fn referer(&self) -> HeaderValue {
        HeaderValue::from_str(self.url.as_str()).unwrap_or(HeaderValue::from_static(""))
    }

    fn context(&self) -> Result<&EventContext, Error> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        self.context.as_ref().ok_or(Error::SessionClosed)
    }

    fn scoped_query<'a>(&self, query: &[(&'a str, String)]) -> Vec<(&'a str, String)> {
        let mut query = query.to_vec();
        if let Some(group) = self.group {
            query.push(("group", group.to_string()));
        }
        query
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.request::<(), T>(Method::GET, path, query, None).await
    }

    /// Like [`get`][Self::get] but maps a 404 to `Ok(None)`.
    async fn get_optional<T>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        match self.get(path, query).await {
            Ok(value) => Ok(Some(value)),
            Err(Error::ServerError(404, _)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetches every page of a list endpoint.
    async fn list<T>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();
        loop {
            let mut page_query = query.to_vec();
            page_query.push(("offset", items.len().to_string()));
            page_query.push(("limit", PAGE_LIMIT.to_string()));

            let page: ListEnvelope<T> = self.get(path, &page_query).await?;
            let received = page.data.len();
            items.extend(page.data);

            let total = page.meta.and_then(|m| m.total_count);
            let done = match total {
                Some(total) => items.len() >= total,
                None => received < PAGE_LIMIT,
            };
            if done || received == 0 {
                break;
            }
        }
        Ok(items)
    }

    async fn request<Body, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Body>,
    ) -> Result<T, Error>
    where
        Body: Serialize,
        T: DeserializeOwned,
    {
        let url = self.url.join(path)?;
        debug!("{} {}", method, url);

        let mut req = self
            .http
            .request(method.clone(), url)
            .header("Accept", "application/json")
            .header("User-Agent", "omero-replace")
            .query(query);

        if method != Method::GET {
            req = req
                .header("X-CSRFToken", &self.csrf)
                .header(REFERER, self.referer());
        }

        if let Some(body) = body {
            if log_enabled!(Level::Trace) {
                trace!(
                    "Request Body: {}",
                    serde_json::ser::to_string_pretty(body)?
                );
            }
            req = req.json(body);
        }

        let res = req.send().await?;
        self.process_response(res).await
    }

    async fn process_response<T>(&self, res: reqwest::Response) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let status = res.status();
        let body = res.bytes().await?;

        if log_enabled!(Level::Trace) {
            trace!("Response {}: {}", status, String::from_utf8_lossy(&body));
        }

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            && self.context.is_some()
        {
            return Err(Error::SessionClosed);
        }

        if !status.is_success() {
            return Err(Error::ServerError(
                status.as_u16(),
                error_message(status, &body),
            ));
        }

        match serde_json::from_slice(&body) {
            Ok(value) => Ok(value),
            Err(err) => {
                error!("Invalid JSON Response: {}", String::from_utf8_lossy(&body));
                Err(err.into())
            }
        }
    }
}

/// Extracts the server's error message from a JSON error body, falling back
/// to the HTTP reason phrase.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        })
}

impl ObjectService for Client {
    async fn groups(&self) -> Result<Vec<Group>, Error> {
        let user_id = self.context()?.user_id;
        let path = format!("api/v0/m/experimenters/{}/experimentergroups/", user_id);
        let groups: Vec<Group> = self.list(&path, &[]).await?;
        // "user" is the system group every account belongs to.
        Ok(groups.into_iter().filter(|g| g.name() != "user").collect())
    }

    async fn set_group(&mut self, group_id: GroupID) -> Result<(), Error> {
        self.context()?;
        self.group = Some(group_id);
        Ok(())
    }

    async fn datasets(&self) -> Result<Vec<Dataset>, Error> {
        self.context()?;
        self.list("api/v0/m/datasets/", &self.scoped_query(&[]))
            .await
    }

    async fn dataset(&self, dataset_id: DatasetID) -> Result<Option<Dataset>, Error> {
        self.context()?;
        let path = format!("api/v0/m/datasets/{}/", dataset_id);
        let dataset: Option<ObjectEnvelope<Dataset>> =
            self.get_optional(&path, &self.scoped_query(&[])).await?;
        Ok(dataset.map(|d| d.data))
    }

    async fn create_dataset(&mut self, name: &str) -> Result<Dataset, Error> {
        self.context()?;
        let body = NewDataset {
            kind: DATASET_TYPE,
            name,
        };
        let created: ObjectEnvelope<Dataset> = self
            .request(
                Method::POST,
                "api/v0/m/save/",
                &self.scoped_query(&[]),
                Some(&body),
            )
            .await?;
        Ok(created.data)
    }

    async fn image(&self, image_id: ImageID) -> Result<Option<Image>, Error> {
        self.context()?;
        let path = format!("api/v0/m/images/{}/", image_id);
        let image: Option<ObjectEnvelope<Image>> =
            self.get_optional(&path, &self.scoped_query(&[])).await?;
        let Some(ObjectEnvelope { data: mut image }) = image else {
            return Ok(None);
        };

        let paths: PathsResult = self
            .get(
                "webclient/api/paths_to_object/",
                &self.scoped_query(&[("image", image_id.to_string())]),
            )
            .await?;
        image.set_parents(parents_from_paths(&paths));
        Ok(Some(image))
    }

    async fn rois(&self, image_id: ImageID) -> Result<Vec<Roi>, Error> {
        self.context()?;
        self.list(
            "api/v0/m/rois/",
            &self.scoped_query(&[("image", image_id.to_string())]),
        )
        .await
    }

    async fn link_image(
        &mut self,
        dataset_id: DatasetID,
        image_id: ImageID,
    ) -> Result<(), Error> {
        self.context()?;
        let body = HashMap::from([(
            "dataset",
            HashMap::from([(
                dataset_id.to_string(),
                HashMap::from([("image", vec![image_id])]),
            )]),
        )]);

        let result: LinkResult = self
            .request(Method::POST, "webclient/api/links/", &[], Some(&body))
            .await?;
        if result.success {
            Ok(())
        } else {
            Err(Error::InvalidResponse)
        }
    }

    async fn save_shape(&mut self, image_id: ImageID, shape: &Shape) -> Result<Shape, Error> {
        self.context()?;
        debug!("Saving shape {} of image {}", shape.id(), image_id);
        let saved: ObjectEnvelope<Shape> = self
            .request(
                Method::PUT,
                "api/v0/m/save/",
                &self.scoped_query(&[]),
                Some(shape),
            )
            .await?;
        Ok(saved.data)
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.closed || self.context.is_none() {
            self.closed = true;
            return Ok(());
        }

        let res = self
            .http
            .post(self.url.join("webclient/logout/")?)
            .header("X-CSRFToken", &self.csrf)
            .header(REFERER, self.referer())
            .send()
            .await;

        self.closed = true;
        self.context = None;

        let res = res?;
        // Logout redirects to the login page once the session is gone.
        if res.status().is_success() || res.status().is_redirection() {
            debug!("Closed session on {}", self.url);
            Ok(())
        } else {
            Err(Error::ServerError(
                res.status().as_u16(),
                "logout failed".to_string(),
            ))
        }
    }
}
