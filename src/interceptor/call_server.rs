//! Terminal interceptor: drives the acquired connection's codec to send
//! the request and read the response (spec.md SS4.1 point 7, SS4.4/SS4.5
//! "Exchange").
//!
//! Grounded on OkHttp's `CallServerInterceptor` — the only link in the
//! chain that does not call `chain.proceed`; it produces the `Response`
//! straight from the wire via [`Exchange`].

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Error;
use crate::exchange::Exchange;
use crate::interceptor::{Chain, Interceptor};
use crate::response::Response;

pub struct CallServerInterceptor;

impl Interceptor for CallServerInterceptor {
    fn intercept(&self, chain: &mut Chain) -> Result<Response, Error> {
        let mut request = chain.take_request();
        let connection = chain
            .connection()
            .expect("connect interceptor must run before call-server")
            .clone();
        let url = request.url().clone();
        let headers = request.headers().clone();
        let cancel = chain.cancel_flag().clone();
        let client = chain.client();

        let mut exchange = Exchange::new(connection.clone(), client.timeouts);
        let sent_at_millis = now_millis();

        let mut response = exchange.execute(&mut request, &url, &headers, &cancel, |_status| true)?;

        connection.note_success();
        response.set_timing(sent_at_millis, now_millis());
        if let Some(handshake) = connection.handshake() {
            response.set_handshake(handshake);
        }
        Ok(response)
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
