//! Test doubles shared by the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::flow::RegistrationHandler;
use crate::transport::{HttpRequest, HttpResponse, Method, Transport, Url};
use crate::types::Client;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone)]
enum Reply {
    Response(HttpResponse),
    Failure(String),
}

struct Queued {
    reply: Reply,
    served: bool,
}

/// Transport replaying canned responses keyed by method and path.
///
/// Replies queued for a route are consumed in order; the last one repeats
/// until a new reply is queued. Unrouted requests get a 404. Every request
/// is recorded.
#[derive(Default)]
pub(crate) struct StubTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Queued>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: impl Into<String>) {
        self.push(
            method,
            path,
            Reply::Response(HttpResponse {
                status,
                body: body.into(),
            }),
        );
    }

    /// Make the route fail without a response (timeout, refused connection).
    pub fn fail(&self, method: Method, path: &str, message: &str) {
        self.push(method, path, Reply::Failure(message.to_string()));
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        let queue = routes.entry((method, path.to_string())).or_default();
        if queue.len() == 1 && queue[0].served {
            queue.clear();
        }
        queue.push_back(Queued {
            reply,
            served: false,
        });
    }

    pub fn requests(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.path() == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests(method, path).len()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for StubTransport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>> {
        let key = (request.method.clone(), request.url.path().to_string());
        self.requests.lock().unwrap().push(request);

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front().map(|q| q.reply),
                Some(queue) => queue.front_mut().map(|q| {
                    q.served = true;
                    q.reply.clone()
                }),
                None => None,
            }
        };

        Box::pin(async move {
            match reply {
                Some(Reply::Response(response)) => Ok(response),
                Some(Reply::Failure(message)) => Err(Error::Http(message)),
                None => Ok(HttpResponse {
                    status: 404,
                    body: String::from("no stub route"),
                }),
            }
        })
    }
}

pub(crate) fn base_url() -> Url {
    Url::parse("https://alice.cozy.example").unwrap()
}

pub(crate) fn registration_body(client_id: &str) -> String {
    serde_json::json!({
        "client_id": client_id,
        "client_secret": format!("secret-{client_id}"),
        "registration_access_token": format!("reg-{client_id}"),
        "redirect_uris": ["http://localhost/callback"],
        "client_name": "Test app",
        "software_id": "test-app"
    })
    .to_string()
}

pub(crate) fn token_body(access: &str, refresh: &str) -> String {
    serde_json::json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "scope": "io.cozy.files"
    })
    .to_string()
}

pub(crate) fn registered_client(client_id: &str) -> Client {
    Client {
        client_id: client_id.into(),
        client_secret: format!("secret-{client_id}"),
        registration_access_token: format!("reg-{client_id}"),
        redirect_uris: vec!["http://localhost/callback".into()],
        client_name: Some("Test app".into()),
        software_id: Some("test-app".into()),
        ..Client::default()
    }
}

/// Handler that approves immediately, echoing the state back with a code.
#[derive(Default)]
pub(crate) struct ApprovingHandler {
    calls: AtomicUsize,
}

impl ApprovingHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RegistrationHandler for ApprovingHandler {
    fn on_registered<'a>(&'a self, _client: &'a Client, url: &'a Url) -> BoxFuture<'a, Result<Url>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(redirect_for(url)) })
    }
}

/// Handler that signals `entered` and then waits for `release` before
/// approving, to observe the manager while a flow is running.
#[derive(Default)]
pub(crate) struct GatedHandler {
    pub entered: Notify,
    pub release: Notify,
}

impl RegistrationHandler for GatedHandler {
    fn on_registered<'a>(&'a self, _client: &'a Client, url: &'a Url) -> BoxFuture<'a, Result<Url>> {
        Box::pin(async move {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(redirect_for(url))
        })
    }
}

/// Redirect page the server would send back for an authorization URL.
pub(crate) fn redirect_for(url: &Url) -> Url {
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();
    let mut page = Url::parse("http://localhost/callback").unwrap();
    page.query_pairs_mut()
        .append_pair("code", "the-code")
        .append_pair("state", &state);
    page
}
