//! Page rendering. Every function here builds a `tera::Context` and renders one
//! template from `templates/`.

use crate::model::*;
use crate::routes;
use log::warn;
use serde::Serialize;

pub const NO_RATING: &str = "No rating available";

/// `Some(7.5)` -> `"7.5/10"`
pub fn rating_label(rating: Option<f64>) -> String {
    match rating {
        Some(rating) => format!("{}/10", rating),
        None => NO_RATING.to_owned(),
    }
}

#[derive(Serialize, Debug)]
pub struct MovieCard<'a> {
    pub id: MovieId,
    pub title: &'a str,
    pub director: &'a str,
    pub release_year: i32,
    pub poster_url: Option<&'a str>,
    pub rating: String,
    pub update_url: String,
    pub delete_url: String,
}

impl<'a> MovieCard<'a> {
    pub fn new(movie: &'a Movie) -> Self {
        MovieCard {
            id: movie.id,
            title: &movie.title,
            director: &movie.director,
            release_year: movie.release_year,
            poster_url: movie.poster_url.as_deref(),
            rating: rating_label(movie.imdb_rating),
            update_url: routes::update_movie(movie.user_id, movie.id),
            delete_url: routes::remove_movie_from_user(movie.user_id, movie.id),
        }
    }
}

#[derive(Serialize, Debug)]
struct UserLink<'a> {
    id: UserId,
    name: &'a str,
    url: String,
}

fn page_context() -> tera::Context {
    let mut ctx = tera::Context::new();
    ctx.insert("home_url", routes::HOME);
    ctx.insert("users_url", routes::LIST_USERS);
    ctx.insert("add_user_url", routes::ADD_USER);
    ctx
}

fn insert_action_result(ctx: &mut tera::Context, action_result: Option<&str>) {
    let action_result = action_result.map(str::trim).filter(|m| !m.is_empty());
    ctx.insert("action_result", &action_result);
}

pub fn render_home(tera: &tera::Tera, user_count: usize, movie_count: usize) -> tera::Result<String> {
    let mut ctx = page_context();
    ctx.insert("user_count", &user_count);
    ctx.insert("movie_count", &movie_count);
    tera.render("home.html", &ctx)
}

pub fn render_users(
    tera: &tera::Tera,
    users: &[User],
    action_result: Option<&str>,
) -> tera::Result<String> {
    let mut ctx = page_context();
    let users = users
        .iter()
        .map(|user| UserLink {
            id: user.id,
            name: &user.name,
            url: routes::user_movies(user.id),
        })
        .collect::<Vec<_>>();
    ctx.insert("users", &users);
    insert_action_result(&mut ctx, action_result);
    tera.render("users.html", &ctx)
}

pub fn render_add_user(tera: &tera::Tera, error: Option<&str>) -> tera::Result<String> {
    let mut ctx = page_context();
    ctx.insert("error", &error);
    tera.render("add_user.html", &ctx)
}

/// The favourite movies of one user: a card per movie, in the given order,
/// each with its update and delete controls.
pub fn render_user_movies(
    tera: &tera::Tera,
    user: &User,
    movies: &[Movie],
    action_result: Option<&str>,
) -> tera::Result<String> {
    let mut ctx = page_context();
    let cards = movies
        .iter()
        .filter(|movie| {
            if movie.user_id != user.id {
                warn!(
                    "movie {} belongs to user {}, not {}",
                    movie.id, movie.user_id, user.id
                );
                return false;
            }
            true
        })
        .map(MovieCard::new)
        .collect::<Vec<_>>();
    ctx.insert("user", user);
    ctx.insert("movies", &cards);
    ctx.insert("add_movie_url", &routes::add_movie_to_user(user.id));
    insert_action_result(&mut ctx, action_result);
    tera.render("user_movies.html", &ctx)
}

pub fn render_add_movie(
    tera: &tera::Tera,
    user: &User,
    error: Option<&str>,
) -> tera::Result<String> {
    let mut ctx = page_context();
    ctx.insert("user", user);
    ctx.insert("user_movies_url", &routes::user_movies(user.id));
    ctx.insert("add_movie_url", &routes::add_movie_to_user(user.id));
    ctx.insert("error", &error);
    tera.render("add_movie.html", &ctx)
}

pub fn render_update_movie(
    tera: &tera::Tera,
    user: &User,
    movie: &Movie,
    error: Option<&str>,
) -> tera::Result<String> {
    let mut ctx = page_context();
    ctx.insert("user", user);
    ctx.insert("movie", movie);
    ctx.insert("rating", &rating_label(movie.imdb_rating));
    let rating_value = movie
        .imdb_rating
        .map(|rating| rating.to_string())
        .unwrap_or_default();
    ctx.insert("rating_value", &rating_value);
    ctx.insert("user_movies_url", &routes::user_movies(user.id));
    ctx.insert("update_url", &routes::update_movie(user.id, movie.id));
    ctx.insert("error", &error);
    tera.render("update_movie.html", &ctx)
}
