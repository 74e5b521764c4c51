use rand::Rng as _;
use url::Url;

use crate::Result;
use crate::error::Error;

/// Which member of an [`EndpointPool`] the first connection attempt targets.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Start {
    /// Always the first endpoint
    First,
    /// A fixed index, wrapped into the pool's range
    Index(usize),
    /// Uniformly random, so that many clients reconnecting at once spread over the pool
    #[default]
    Random,
}

/// Ordered, non-empty set of interchangeable WebSocket endpoints.
///
/// A pool of one endpoint is the single-endpoint mode: rotation always lands on it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPool {
    endpoints: Vec<Url>,
}

impl EndpointPool {
    pub fn new<I, S>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| {
                let url = Url::parse(endpoint.as_ref())?;
                match url.scheme() {
                    "ws" | "wss" => Ok(url),
                    scheme => Err(Error::validation(format!(
                        "unsupported endpoint scheme {scheme} in {url}"
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        if endpoints.is_empty() {
            return Err(Error::validation("endpoint pool must not be empty"));
        }

        Ok(Self { endpoints })
    }

    pub fn single(endpoint: &str) -> Result<Self> {
        Self::new([endpoint])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always `false`, pools are never empty. Present for API symmetry with [`Self::len`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The endpoint at `index`, wrapped into range.
    #[must_use]
    pub fn get(&self, index: usize) -> &Url {
        &self.endpoints[index % self.endpoints.len()]
    }

    /// The index following `index`, wrapping to 0 at the end.
    #[must_use]
    pub fn next(&self, index: usize) -> usize {
        (index + 1) % self.endpoints.len()
    }

    #[must_use]
    pub fn start_index(&self, start: Start) -> usize {
        match start {
            Start::First => 0,
            Start::Index(index) => index % self.endpoints.len(),
            Start::Random => rand::rng().random_range(0..self.endpoints.len()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.endpoints.iter()
    }
}
