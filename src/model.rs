use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type MovieId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Movie {
    pub id: MovieId,
    pub user_id: UserId,
    pub title: String,
    pub director: String,
    pub release_year: i32,
    pub poster_url: Option<String>,
    pub imdb_rating: Option<f64>,
}

/// Movie details as returned by a lookup, before they are attached to a user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewMovie {
    pub title: String,
    pub director: String,
    pub release_year: i32,
    pub poster_url: Option<String>,
    pub imdb_rating: Option<f64>,
}

impl NewMovie {
    pub fn into_movie(self, id: MovieId, user_id: UserId) -> Movie {
        Movie {
            id,
            user_id,
            title: self.title,
            director: self.director,
            release_year: self.release_year,
            poster_url: self.poster_url,
            imdb_rating: self.imdb_rating,
        }
    }
}

/// Partial update of a movie. `None` and blank strings leave a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieChanges {
    pub title: Option<String>,
    pub director: Option<String>,
    pub release_year: Option<i32>,
    pub imdb_rating: Option<f64>,
}

impl MovieChanges {
    pub fn apply(self, movie: &mut Movie) {
        if let Some(title) = non_blank(self.title) {
            movie.title = title;
        }
        if let Some(director) = non_blank(self.director) {
            movie.director = director;
        }
        if let Some(year) = self.release_year {
            movie.release_year = year;
        }
        if let Some(rating) = self.imdb_rating {
            movie.imdb_rating = Some(rating);
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
