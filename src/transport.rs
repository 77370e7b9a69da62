//! The HTTP transport seam.


use http::{Request, Response};


/// Something that sends a request and waits for the response: a single HTTP round trip.
///
/// The request is only borrowed so that the handshake can send the same request twice, each time
/// with a different `Proxy-Authorization` header. Timeouts and cancellation are the
/// implementation's business; errors are passed on to the caller untouched.
pub trait RoundTrip<B> {
    /// The body type of responses.
    type Body;

    /// The error type of failed round trips.
    type Error;

    fn round_trip(&mut self, request: &Request<B>) -> Result<Response<Self::Body>, Self::Error>;
}

impl<B, T: RoundTrip<B> + ?Sized> RoundTrip<B> for &mut T {
    type Body = T::Body;
    type Error = T::Error;

    fn round_trip(&mut self, request: &Request<B>) -> Result<Response<Self::Body>, Self::Error> {
        (**self).round_trip(request)
    }
}


#[cfg(feature = "reqwest")]
mod reqwest_blocking {
    use http::{Request, Response};
    use reqwest::blocking::{Body, Client};

    use super::RoundTrip;

    /// Sends requests through a blocking reqwest client, typically one configured with a proxy.
    ///
    /// The response body is read completely before it is returned.
    impl<B> RoundTrip<B> for Client
    where
        B: Clone + Into<Body>,
    {
        type Body = Vec<u8>;
        type Error = reqwest::Error;

        fn round_trip(&mut self, request: &Request<B>) -> Result<Response<Vec<u8>>, reqwest::Error> {
            let mut copy = Request::new(request.body().clone());
            *copy.method_mut() = request.method().clone();
            *copy.uri_mut() = request.uri().clone();
            *copy.version_mut() = request.version();
            *copy.headers_mut() = request.headers().clone();

            let response = self.execute(reqwest::blocking::Request::try_from(copy)?)?;

            let status = response.status();
            let version = response.version();
            let headers = response.headers().clone();
            let body = response.bytes()?.to_vec();

            let mut converted = Response::new(body);
            *converted.status_mut() = status;
            *converted.version_mut() = version;
            *converted.headers_mut() = headers;
            Ok(converted)
        }
    }
}
