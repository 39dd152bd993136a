mod database;
mod model;
mod omdb;
mod routes;
mod settings;
mod view;

use actix_web::{error, middleware::Logger, web, App, HttpResponse, HttpServer};
use database::{MovieDb, MovieUpdate};
use log::{debug, info, warn};
use model::*;
use omdb::{MovieLookup, OmdbClient};
use serde::Deserialize;
use std::sync::Arc;

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;
type Lookup = web::Data<dyn MovieLookup>;

const RELEASE_YEARS: std::ops::RangeInclusive<i32> = 1888..=2100;

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    debug!("{:?}", err);
    error::ErrorInternalServerError(message)
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

fn bad_request(body: String) -> HttpResponse {
    HttpResponse::BadRequest()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

fn redirect(location: String) -> HttpResponse {
    HttpResponse::Found()
        .append_header(("location", location))
        .finish()
}

fn find_user(db: &sled::Db, user_id: UserId) -> actix_web::Result<User> {
    db.get_user(user_id)
        .map_err(|err| log_error(err, "Database error"))?
        .ok_or_else(|| error::ErrorNotFound("User not found"))
}

fn find_movie(db: &sled::Db, user_id: UserId, movie_id: MovieId) -> actix_web::Result<Movie> {
    db.get_user_movie(user_id, movie_id)
        .map_err(|err| log_error(err, "Database error"))?
        .ok_or_else(|| error::ErrorNotFound("Movie not found"))
}

#[derive(Deserialize)]
struct ActionResultQuery {
    action_result: Option<String>,
}

async fn index(tera: Tera, db: Db) -> actix_web::Result<HttpResponse> {
    let users = db
        .all_users()
        .map_err(|err| log_error(err, "Database error"))?;
    let movies = db
        .all_movies()
        .map_err(|err| log_error(err, "Database error"))?;
    let body = view::render_home(&tera, users.len(), movies.len())
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(html(body))
}

async fn list_users(
    query: web::Query<ActionResultQuery>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let users = db
        .all_users()
        .map_err(|err| log_error(err, "Database error"))?;
    let body = view::render_users(&tera, &users, query.action_result.as_deref())
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(html(body))
}

async fn add_user_form(tera: Tera) -> actix_web::Result<HttpResponse> {
    let body = view::render_add_user(&tera, None).map_err(|err| log_error(err, "Template error"))?;
    Ok(html(body))
}

#[derive(Deserialize)]
struct AddUserParams {
    name: String,
}

async fn add_user(
    params: web::Form<AddUserParams>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let name = params.name.trim();
    if name.is_empty() {
        let body = view::render_add_user(&tera, Some("Please enter a name."))
            .map_err(|err| log_error(err, "Template error"))?;
        return Ok(bad_request(body));
    }
    let user = db
        .add_user(name)
        .map_err(|err| log_error(err, "Database error"))?;
    info!("added user {} ({})", user.id, user.name);
    Ok(redirect(routes::with_action_result(
        routes::LIST_USERS,
        &format!("User {} was added.", user.name),
    )))
}

async fn user_movies(
    path: web::Path<UserId>,
    query: web::Query<ActionResultQuery>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let user = find_user(&db, path.into_inner())?;
    let movies = db
        .user_movies(user.id)
        .map_err(|err| log_error(err, "Database error"))?;
    let body = view::render_user_movies(&tera, &user, &movies, query.action_result.as_deref())
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(html(body))
}

async fn add_movie_form(
    path: web::Path<UserId>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let user = find_user(&db, path.into_inner())?;
    let body =
        view::render_add_movie(&tera, &user, None).map_err(|err| log_error(err, "Template error"))?;
    Ok(html(body))
}

#[derive(Deserialize)]
struct AddMovieParams {
    title: String,
}

async fn add_movie(
    path: web::Path<UserId>,
    params: web::Form<AddMovieParams>,
    tera: Tera,
    db: Db,
    lookup: Lookup,
) -> actix_web::Result<HttpResponse> {
    let user = find_user(&db, path.into_inner())?;
    let title = params.title.trim();
    if title.is_empty() {
        let body = view::render_add_movie(&tera, &user, Some("Please enter a title."))
            .map_err(|err| log_error(err, "Template error"))?;
        return Ok(bad_request(body));
    }

    let message = match lookup.lookup(title).await {
        Ok(movie) => {
            let found = movie.title.clone();
            match db
                .add_movie(user.id, movie)
                .map_err(|err| log_error(err, "Database error"))?
            {
                Some(movie) => {
                    info!("user {} added movie {} ({})", user.id, movie.id, movie.title);
                    format!("{} was added to your favourites.", movie.title)
                }
                None => format!("{} is already in your favourites.", found),
            }
        }
        Err(err) => {
            warn!("lookup of {:?} failed: {}", title, err);
            err.to_string()
        }
    };
    Ok(redirect(routes::with_action_result(
        &routes::user_movies(user.id),
        &message,
    )))
}

async fn update_movie_form(
    path: web::Path<(UserId, MovieId)>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (user_id, movie_id) = path.into_inner();
    let user = find_user(&db, user_id)?;
    let movie = find_movie(&db, user_id, movie_id)?;
    let body = view::render_update_movie(&tera, &user, &movie, None)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(html(body))
}

/// Every field is optional; a blank one keeps the stored value.
#[derive(Deserialize)]
struct UpdateMovieParams {
    #[serde(default)]
    title: String,
    #[serde(default)]
    director: String,
    #[serde(default)]
    release_year: String,
    #[serde(default)]
    imdb_rating: String,
}

impl UpdateMovieParams {
    fn into_changes(self) -> Result<MovieChanges, &'static str> {
        let release_year = match self.release_year.trim() {
            "" => None,
            year => {
                let year = year
                    .parse::<i32>()
                    .map_err(|_| "Release year must be a whole number.")?;
                if !RELEASE_YEARS.contains(&year) {
                    return Err("Release year must be between 1888 and 2100.");
                }
                Some(year)
            }
        };
        let imdb_rating = match self.imdb_rating.trim() {
            "" => None,
            rating => {
                let rating = rating
                    .parse::<f64>()
                    .map_err(|_| "Rating must be a number.")?;
                if !(0.0..=10.0).contains(&rating) {
                    return Err("Rating must be between 0 and 10.");
                }
                Some(rating)
            }
        };
        Ok(MovieChanges {
            title: Some(self.title),
            director: Some(self.director),
            release_year,
            imdb_rating,
        })
    }
}

async fn update_movie(
    path: web::Path<(UserId, MovieId)>,
    params: web::Form<UpdateMovieParams>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (user_id, movie_id) = path.into_inner();
    let user = find_user(&db, user_id)?;
    let message = match params.into_inner().into_changes() {
        Ok(changes) => match db
            .update_movie(user_id, movie_id, changes)
            .map_err(|err| log_error(err, "Database error"))?
        {
            MovieUpdate::Updated(movie) => {
                info!("user {} updated movie {}", user_id, movie_id);
                return Ok(redirect(routes::with_action_result(
                    &routes::user_movies(user_id),
                    &format!("{} was updated.", movie.title),
                )));
            }
            MovieUpdate::NotFound => return Err(error::ErrorNotFound("Movie not found")),
            MovieUpdate::Duplicate => {
                "Another movie in your favourites already has this title, director and year."
            }
        },
        Err(message) => message,
    };
    let movie = find_movie(&db, user_id, movie_id)?;
    let body = view::render_update_movie(&tera, &user, &movie, Some(message))
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(bad_request(body))
}

async fn delete_movie(
    path: web::Path<(UserId, MovieId)>,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (user_id, movie_id) = path.into_inner();
    let movie = db
        .delete_movie(user_id, movie_id)
        .map_err(|err| log_error(err, "Database error"))?
        .ok_or_else(|| error::ErrorNotFound("Movie not found"))?;
    info!("user {} removed movie {}", user_id, movie_id);
    Ok(redirect(routes::with_action_result(
        &routes::user_movies(user_id),
        &format!("{} was removed.", movie.title),
    )))
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/users", web::get().to(list_users))
        .route("/add_user", web::get().to(add_user_form))
        .route("/add_user", web::post().to(add_user))
        .route("/users/{user_id}", web::get().to(user_movies))
        .route("/users/{user_id}/add_movie", web::get().to(add_movie_form))
        .route("/users/{user_id}/add_movie", web::post().to(add_movie))
        .route(
            "/users/{user_id}/update_movie/{movie_id}",
            web::get().to(update_movie_form),
        )
        .route(
            "/users/{user_id}/update_movie/{movie_id}",
            web::post().to(update_movie),
        )
        .route(
            "/users/{user_id}/delete_movie/{movie_id}",
            web::post().to(delete_movie),
        );
}

fn startup_error<E: Into<Box<dyn std::error::Error + Send + Sync>>>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("movieweb=debug,actix_web=info"),
    )
    .init();

    let settings = settings::Settings::new().map_err(startup_error)?;
    let tera = tera::Tera::new(&settings.server.templates).map_err(startup_error)?;
    let db = settings.database.open().map_err(startup_error)?;
    if settings.omdb.api_key.is_empty() {
        warn!("no OMDb API key configured, movies cannot be looked up");
    }
    let lookup: Arc<dyn MovieLookup> = Arc::new(
        OmdbClient::new(&settings.omdb.base_url, &settings.omdb.api_key)
            .map_err(startup_error)?,
    );

    let tera = web::Data::new(tera);
    let db = web::Data::new(db);
    let lookup: Lookup = web::Data::from(lookup);
    info!("listening on {}", settings.server.bind);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(tera.clone())
            .app_data(db.clone())
            .app_data(lookup.clone())
            .configure(configure)
    })
    .bind(&settings.server.bind)?
    .run()
    .await
}
