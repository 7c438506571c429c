use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, info};

use crate::device::Device;
use crate::json::JsonWriter;
use crate::property::Property;

use super::config::NetworkSettings;

/// Identifier of a pending request, chosen by the [`super::services::WebServer`].
pub type RequestId = u32;

/// `HTTP` methods understood by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`.
    Get,
    /// `PUT`.
    Put,
    /// `POST`.
    Post,
    /// Any other method.
    Other,
}

impl Method {
    /// Maps a method name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "GET" => Self::Get,
            "PUT" => Self::Put,
            "POST" => Self::Post,
            _ => Self::Other,
        }
    }
}

/// An `HTTP` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Identifier used to answer the request.
    pub id: RequestId,
    /// Method.
    pub method: Method,
    /// Path, possibly followed by a query.
    pub path: String,
    /// Body.
    pub body: Vec<u8>,
}

/// Status line and content type of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headers {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub message: &'static str,
    /// Content type.
    pub content_type: &'static str,
}

impl Headers {
    const fn json() -> Self {
        Self {
            status: 200,
            message: "Ok",
            content_type: "application/json",
        }
    }

    const fn json_error() -> Self {
        Self {
            status: 500,
            message: "Error",
            content_type: "application/json",
        }
    }

    const fn not_found() -> Self {
        Self {
            status: 404,
            message: "Not Found",
            content_type: "text/plain",
        }
    }

    const fn not_allowed() -> Self {
        Self {
            status: 405,
            message: "Method Not Allowed",
            content_type: "text/plain",
        }
    }
}

/// An `HTTP` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    headers: Headers,
    body: Cow<'static, [u8]>,
}

impl Response {
    /// Creates a `200` JSON response.
    #[must_use]
    pub fn json(body: String) -> Self {
        Self::new(Headers::json(), Cow::Owned(body.into_bytes()))
    }

    /// Creates a `500` JSON response carrying an error description.
    #[must_use]
    pub fn error(description: &str) -> Self {
        let mut json = JsonWriter::new();
        let _ = json.begin_object().field_str("error", description).end_object();
        Self::new(Headers::json_error(), Cow::Owned(json.finish().into_bytes()))
    }

    /// Creates a `404` response.
    #[must_use]
    pub const fn not_found() -> Self {
        Self::new(Headers::not_found(), Cow::Borrowed(b"Not found"))
    }

    /// Creates a `405` response.
    #[must_use]
    pub const fn not_allowed() -> Self {
        Self::new(Headers::not_allowed(), Cow::Borrowed(b"Method not allowed"))
    }

    /// Returns the [`Headers`].
    #[must_use]
    pub const fn headers(&self) -> Headers {
        self.headers
    }

    /// Returns the status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.headers.status
    }

    /// Returns the body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    const fn new(headers: Headers, body: Cow<'static, [u8]>) -> Self {
        Self { headers, body }
    }
}

// What the engine has to do once the response is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    SaveNetwork,
    ResetAll,
}

/// Routes a request:
///
/// - `GET /things`
/// - `GET /things/{device}`
/// - `GET /things/{device}/properties`
/// - `GET|PUT /things/{device}/properties/{property}`
/// - `GET|POST /config`
/// - `POST /config/reset`
///
/// `/config` answers with the masked network settings and the running
/// `firmware` version.
pub(crate) fn handle(
    request: &Request,
    devices: &mut [Device],
    settings: &mut NetworkSettings,
    firmware_version: &str,
) -> (Response, Action) {
    let path = request.path.split('?').next().unwrap_or_default();
    let path = path.strip_suffix('/').unwrap_or(path);

    info!("{:?} {path}", request.method);

    let mut segments = path.split('/');
    // Every path starts with `/`.
    if segments.next() != Some("") {
        return (Response::not_found(), Action::None);
    }

    let segments: Vec<&str> = segments.collect();
    match (request.method, segments.as_slice()) {
        (Method::Get, ["things"]) => (things(devices), Action::None),
        (Method::Get, ["things", device]) => (
            find(devices, device).map_or_else(Response::not_found, |device| {
                let mut json = JsonWriter::new();
                device.to_structure(&mut json);
                Response::json(json.finish())
            }),
            Action::None,
        ),
        (Method::Get, ["things", device, "properties"]) => (
            find_mut(devices, device).map_or_else(Response::not_found, |device| {
                let mut json = JsonWriter::new();
                device.properties_mut().write_values(&mut json, is_http_visible);
                Response::json(json.finish())
            }),
            Action::None,
        ),
        (Method::Get | Method::Put, ["things", device, "properties", property]) => (
            find_mut(devices, device).map_or_else(Response::not_found, |device| {
                single_property(request, device, property)
            }),
            Action::None,
        ),
        (Method::Get, ["config"]) => (config(settings, firmware_version), Action::None),
        (Method::Post, ["config"]) => {
            let applied = settings.apply_json(&request.body);
            info!("Network configuration updated, {applied} settings changed");
            (config(settings, firmware_version), Action::SaveNetwork)
        }
        (Method::Post, ["config", "reset"]) => {
            let mut json = JsonWriter::new();
            let _ = json.begin_object().field_bool("reset", true).end_object();
            (Response::json(json.finish()), Action::ResetAll)
        }
        (_, ["things" | "config", ..]) if is_known(&segments) => {
            (Response::not_allowed(), Action::None)
        }
        _ => {
            debug!("No route for {path}");
            (Response::not_found(), Action::None)
        }
    }
}

// Whether some method is routed for this path shape.
fn is_known(segments: &[&str]) -> bool {
    matches!(
        segments,
        ["things"]
            | ["things", _]
            | ["things", _, "properties"]
            | ["things", _, "properties", _]
            | ["config"]
            | ["config", "reset"]
    )
}

fn config(settings: &NetworkSettings, firmware_version: &str) -> Response {
    let mut json = JsonWriter::new();
    let _ = json
        .begin_object()
        .field_str("firmware", firmware_version);
    settings.write_masked(&mut json);
    let _ = json.end_object();
    Response::json(json.finish())
}

fn is_http_visible(property: &Property) -> bool {
    property.get_visibility().is_http_visible()
}

fn find<'a>(devices: &'a [Device], id: &str) -> Option<&'a Device> {
    devices.iter().find(|device| device.id() == id)
}

fn find_mut<'a>(devices: &'a mut [Device], id: &str) -> Option<&'a mut Device> {
    devices.iter_mut().find(|device| device.id() == id)
}

fn things(devices: &[Device]) -> Response {
    let mut json = JsonWriter::new();
    let _ = json.begin_array();
    for device in devices {
        device.to_structure(&mut json);
    }
    let _ = json.end_array();
    Response::json(json.finish())
}

fn single_property(request: &Request, device: &mut Device, id: &str) -> Response {
    if !device.property(id).is_some_and(is_http_visible) {
        return Response::not_found();
    }

    if request.method == Method::Put && device.parse_json(&request.body, is_http_visible).is_none()
    {
        debug!("No value of `{}` accepted", device.id());
    }

    let Some(property) = device.property_mut(id) else {
        return Response::not_found();
    };
    if request.method == Method::Get {
        property.mark_requested();
    }

    let mut json = JsonWriter::new();
    let _ = json.begin_object();
    property.to_value(&mut json, true);
    let _ = json.end_object();
    Response::json(json.finish())
}
