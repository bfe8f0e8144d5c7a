//! Bridge interceptor: translates between the user's `Request`/`Response`
//! model and the wire-ready form every codec expects (spec.md SS4.1
//! point 3).
//!
//! Grounded on the teacher's `client/conn` default-header conventions
//! (`Connection`, `Host`) and the cookie-jar/gzip plumbing named in SS6;
//! gzip is applied transparently with `flate2`, matching the crate's
//! existing use of that dependency for the on-disk cache's compressed
//! public suffix list.

use http::HeaderValue;

use crate::error::Error;
use crate::interceptor::{Chain, Interceptor};
use crate::response::{Response, ResponseBody};

pub struct BridgeInterceptor;

impl Interceptor for BridgeInterceptor {
    fn intercept(&self, chain: &mut Chain) -> Result<Response, Error> {
        let mut request = chain.take_request();
        let client = chain.client();

        if let Some(content_type) = request.body().content_type() {
            if !request.headers().contains("content-type") {
                let _ = request.headers_mut().push_str("content-type", content_type);
            }
        }
        match request.body().byte_size() {
            Some(len) => {
                let mut buf = itoa::Buffer::new();
                let value = HeaderValue::from_str(buf.format(len)).expect("decimal digits are a valid header value");
                request.headers_mut().set(http::header::CONTENT_LENGTH, value);
            }
            None => {
                request
                    .headers_mut()
                    .set(http::header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
        }
        request
            .headers_mut()
            .set(http::header::HOST, HeaderValue::from_str(&request.url().host_header()).map_err(Error::protocol)?);
        request
            .headers_mut()
            .set(http::header::CONNECTION, HeaderValue::from_static("Keep-Alive"));

        let transparent_gzip = !request.headers().contains("range") && !request.headers().contains("accept-encoding");
        if transparent_gzip {
            request
                .headers_mut()
                .set(http::header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let cookies = client.cookie_jar.load_for_request(request.url());
        if !cookies.is_empty() {
            let value = cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            request.headers_mut().set(http::header::COOKIE, HeaderValue::from_str(&value).map_err(Error::protocol)?);
        }

        if !request.headers().contains("user-agent") {
            let _ = request.headers_mut().push_str("user-agent", &client.user_agent);
        }

        let mut response = chain.proceed(request)?;

        let set_cookie: Vec<String> = response.headers().get_all("set-cookie").map(str::to_owned).collect();
        if !set_cookie.is_empty() {
            let url = response.request().url().clone();
            let cookies = set_cookie.iter().filter_map(|v| crate::cookie::Cookie::parse(&url, v)).collect();
            client.cookie_jar.save_from_response(&url, cookies);
        }

        if transparent_gzip && response.headers().get("content-encoding") == Some("gzip") {
            ungzip_body(&mut response);
        }

        Ok(response)
    }
}

fn ungzip_body(response: &mut Response) {
    let Some(body) = response.take_body() else { return };
    let decoder = flate2::read::GzDecoder::new(body);
    response.replace_body(Some(ResponseBody::new(decoder, None)));
    response.headers_mut().remove("content-encoding");
    response.headers_mut().remove("content-length");
}
