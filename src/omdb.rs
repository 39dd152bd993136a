//! Movie details from the Open Movie Database (<https://www.omdbapi.com/>).

use crate::model::NewMovie;
use futures_util::future::{BoxFuture, FutureExt};
use log::debug;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OmdbError {
    #[error("Error: no OMDb API key configured")]
    MissingApiKey,

    #[error("Request Exception: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP Error: {0}")]
    Status(u16),

    #[error("Error: {0}")]
    NotFound(String),

    #[error("Error: invalid {field} in response: {value}")]
    InvalidField { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, OmdbError>;

/// Resolves a movie title into full movie details.
pub trait MovieLookup: Send + Sync {
    fn lookup<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Result<NewMovie>>;
}

const NOT_AVAILABLE: &str = "N/A";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct OmdbResponse {
    response: String,
    title: Option<String>,
    director: Option<String>,
    year: Option<String>,
    #[serde(rename = "imdbRating")]
    imdb_rating: Option<String>,
    poster: Option<String>,
    error: Option<String>,
}

fn available(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && v != NOT_AVAILABLE)
}

/// "1994" -> 1994, "2008–2013" -> 2008
fn parse_year(year: &str) -> Option<i32> {
    let digits: String = year
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

impl OmdbResponse {
    fn into_movie(self) -> Result<NewMovie> {
        if self.response != "True" {
            return Err(OmdbError::NotFound(
                self.error.unwrap_or_else(|| "Movie not found!".to_owned()),
            ));
        }
        let year = self.year.unwrap_or_default();
        let release_year = parse_year(&year).ok_or(OmdbError::InvalidField {
            field: "Year",
            value: year.clone(),
        })?;
        let imdb_rating = match available(self.imdb_rating) {
            Some(rating) => Some(rating.parse::<f64>().map_err(|_| OmdbError::InvalidField {
                field: "imdbRating",
                value: rating.clone(),
            })?),
            None => None,
        };
        Ok(NewMovie {
            title: self.title.unwrap_or_else(|| NOT_AVAILABLE.to_owned()),
            director: self.director.unwrap_or_else(|| NOT_AVAILABLE.to_owned()),
            release_year,
            poster_url: available(self.poster),
            imdb_rating,
        })
    }
}

pub struct OmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OmdbClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("movieweb/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(OmdbClient {
            http,
            base_url: base_url.to_owned(),
            api_key: api_key.to_owned(),
        })
    }

    async fn fetch(&self, title: &str) -> Result<NewMovie> {
        if self.api_key.is_empty() {
            return Err(OmdbError::MissingApiKey);
        }
        let res = self
            .http
            .get(&self.base_url)
            .query(&[("apikey", self.api_key.as_str()), ("t", title.trim())])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(OmdbError::Status(res.status().as_u16()));
        }
        let body: OmdbResponse = res.json().await?;
        debug!("omdb response for {:?}: {:?}", title, body);
        body.into_movie()
    }
}

impl MovieLookup for OmdbClient {
    fn lookup<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Result<NewMovie>> {
        self.fetch(title).boxed()
    }
}
