//! Paths of every page, shared by the templates and the redirecting handlers.

use crate::model::{MovieId, UserId};

pub const HOME: &str = "/";
pub const LIST_USERS: &str = "/users";
pub const ADD_USER: &str = "/add_user";

pub fn user_movies(user_id: UserId) -> String {
    format!("/users/{}", user_id)
}

pub fn add_movie_to_user(user_id: UserId) -> String {
    format!("/users/{}/add_movie", user_id)
}

pub fn update_movie(user_id: UserId, movie_id: MovieId) -> String {
    format!("/users/{}/update_movie/{}", user_id, movie_id)
}

pub fn remove_movie_from_user(user_id: UserId, movie_id: MovieId) -> String {
    format!("/users/{}/delete_movie/{}", user_id, movie_id)
}

pub fn with_action_result(path: &str, message: &str) -> String {
    format!("{}?action_result={}", path, urlencoding::encode(message))
}
