use crate::http::fetch_bytes;
use anyhow::{
    Context,
    Result,
};
use roller::ports::{
    RandomnessSource,
    ThreadRngSource,
};
use std::fmt;

pub const DEFAULT_RANDOM_ORG_URL: &str = "https://www.random.org";

/// random.org integer generator, one number per request.
#[derive(Clone)]
pub struct RandomOrgClient {
    base_url: String,
    http: reqwest::Client,
}

impl RandomOrgClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    fn integers_url(&self, min: u32, max: u32) -> String {
        format!(
            "{}/integers/?num=1&min={min}&max={max}&col=1&base=10&format=plain&rnd=new",
            self.base_url
        )
    }
}

impl RandomnessSource for RandomOrgClient {
    async fn get_random_integer(&self, min: u32, max: u32) -> Result<u32> {
        let bytes =
            fetch_bytes(&self.http, &self.integers_url(min, max), "random.org").await?;
        parse_integer(&bytes)
    }
}

/// Plain-text body holding a single integer.
pub fn parse_integer(bytes: &[u8]) -> Result<u32> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    trimmed
        .parse()
        .with_context(|| format!("random.org returned a non-integer body: {trimmed:?}"))
}

/// Randomness source selected at start-up.
#[derive(Clone)]
pub enum Randomness {
    RandomOrg(RandomOrgClient),
    Local(ThreadRngSource),
}

impl fmt::Display for Randomness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Randomness::RandomOrg(_) => f.write_str("random.org"),
            Randomness::Local(_) => f.write_str("local rng"),
        }
    }
}

impl RandomnessSource for Randomness {
    async fn get_random_integer(&self, min: u32, max: u32) -> Result<u32> {
        match self {
            Randomness::RandomOrg(client) => client.get_random_integer(min, max).await,
            Randomness::Local(rng) => rng.get_random_integer(min, max).await,
        }
    }
}
