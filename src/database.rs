use crate::model::*;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::convert::TryFrom;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("malformed key in database")]
    CorruptKey,

    #[error("user {0} does not exist")]
    UserNotFound(UserId),

    #[error("transaction aborted")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, DbError>;

// Keys are big-endian so that sled iterates them in id order.
fn serialize_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn deserialize_id(id: &[u8]) -> Result<u64> {
    <[u8; 8]>::try_from(id)
        .map(u64::from_be_bytes)
        .map_err(|_| DbError::CorruptKey)
}

fn link_key(user_id: UserId, movie_id: MovieId) -> Vec<u8> {
    let mut key = serialize_id(user_id).to_vec();
    key.extend_from_slice(&serialize_id(movie_id));
    key
}

/// Key of the per-user uniqueness index: user id, then the movie's identity.
fn unique_key(
    user_id: UserId,
    title: &str,
    director: &str,
    release_year: i32,
) -> bincode::Result<Vec<u8>> {
    let mut key = serialize_id(user_id).to_vec();
    key.extend(bincode::serialize(&(title, director, release_year))?);
    Ok(key)
}

/// Reasons a movie transaction aborts.
#[derive(Debug)]
enum Conflict {
    Duplicate,
    Missing,
    Encoding(bincode::Error),
}

fn encoding_abort(err: bincode::Error) -> ConflictableTransactionError<Conflict> {
    ConflictableTransactionError::Abort(Conflict::Encoding(err))
}

fn transaction_error(err: TransactionError<Conflict>) -> DbError {
    match err {
        TransactionError::Storage(e) => DbError::Storage(e),
        TransactionError::Abort(Conflict::Encoding(e)) => DbError::Encoding(e),
        TransactionError::Abort(_) => DbError::Aborted,
    }
}

#[derive(Debug, PartialEq)]
pub enum MovieUpdate {
    Updated(Movie),
    NotFound,
    /// The user already has another movie with the new title, director and year.
    Duplicate,
}

pub trait MovieDb {
    type Error;
    fn add_user(&self, name: &str) -> std::result::Result<User, Self::Error>;
    fn get_user(&self, id: UserId) -> std::result::Result<Option<User>, Self::Error>;
    fn all_users(&self) -> std::result::Result<Vec<User>, Self::Error>;
    fn all_movies(&self) -> std::result::Result<Vec<Movie>, Self::Error>;
    fn user_movies(&self, user_id: UserId) -> std::result::Result<Vec<Movie>, Self::Error>;
    fn get_user_movie(
        &self,
        user_id: UserId,
        movie_id: MovieId,
    ) -> std::result::Result<Option<Movie>, Self::Error>;
    /// Returns `None` if the user already has a movie with the same title,
    /// director and release year.
    fn add_movie(
        &self,
        user_id: UserId,
        movie: NewMovie,
    ) -> std::result::Result<Option<Movie>, Self::Error>;
    fn update_movie(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        changes: MovieChanges,
    ) -> std::result::Result<MovieUpdate, Self::Error>;
    fn delete_movie(
        &self,
        user_id: UserId,
        movie_id: MovieId,
    ) -> std::result::Result<Option<Movie>, Self::Error>;
}

const USERS: &[u8] = b"users";
const MOVIES: &[u8] = b"movies";
const USER_MOVIES: &[u8] = b"user_movies";
const MOVIES_UNIQUE: &[u8] = b"movies_unique";
const EMPTY: &[u8] = &[];

impl MovieDb for sled::Db {
    type Error = DbError;

    fn add_user(&self, name: &str) -> Result<User> {
        let users = self.open_tree(USERS)?;
        let user = User {
            id: self.generate_id()?,
            name: name.trim().to_owned(),
        };
        users.insert(serialize_id(user.id), bincode::serialize(&user)?)?;
        Ok(user)
    }

    fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        match users.get(serialize_id(id))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn all_users(&self) -> Result<Vec<User>> {
        let users = self.open_tree(USERS)?;
        users
            .iter()
            .values()
            .map(|data| -> Result<User> { Ok(bincode::deserialize(&data?)?) })
            .collect()
    }

    fn all_movies(&self) -> Result<Vec<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        movies
            .iter()
            .values()
            .map(|data| -> Result<Movie> { Ok(bincode::deserialize(&data?)?) })
            .collect()
    }

    fn user_movies(&self, user_id: UserId) -> Result<Vec<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        let user_movies = self.open_tree(USER_MOVIES)?;
        let mut ret = Vec::new();
        for key in user_movies.scan_prefix(serialize_id(user_id)).keys() {
            let key = key?;
            let movie_id = deserialize_id(key.get(8..).ok_or(DbError::CorruptKey)?)?;
            // The index may briefly outlive a movie removed concurrently.
            if let Some(data) = movies.get(serialize_id(movie_id))? {
                ret.push(bincode::deserialize(&data)?);
            }
        }
        Ok(ret)
    }

    fn get_user_movie(&self, user_id: UserId, movie_id: MovieId) -> Result<Option<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        let movie: Option<Movie> = match movies.get(serialize_id(movie_id))? {
            Some(data) => Some(bincode::deserialize(&data)?),
            None => None,
        };
        Ok(movie.filter(|m| m.user_id == user_id))
    }

    fn add_movie(&self, user_id: UserId, movie: NewMovie) -> Result<Option<Movie>> {
        if self.get_user(user_id)?.is_none() {
            return Err(DbError::UserNotFound(user_id));
        }
        let movies = self.open_tree(MOVIES)?;
        let user_movies = self.open_tree(USER_MOVIES)?;
        let movies_unique = self.open_tree(MOVIES_UNIQUE)?;
        let unique = unique_key(user_id, &movie.title, &movie.director, movie.release_year)?;
        let movie = movie.into_movie(self.generate_id()?, user_id);
        let data = bincode::serialize(&movie)?;
        let movie_key = serialize_id(movie.id);
        let link = link_key(user_id, movie.id);
        let result = (&movies, &user_movies, &movies_unique).transaction(
            |(movies, user_movies, movies_unique)| {
                if movies_unique.insert(&unique[..], &movie_key[..])?.is_some() {
                    return Err(ConflictableTransactionError::Abort(Conflict::Duplicate));
                }
                movies.insert(&movie_key[..], data.clone())?;
                user_movies.insert(&link[..], EMPTY)?;
                Ok(())
            },
        );
        match result {
            Ok(()) => Ok(Some(movie)),
            Err(TransactionError::Abort(Conflict::Duplicate)) => Ok(None),
            Err(err) => Err(transaction_error(err)),
        }
    }

    fn update_movie(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        changes: MovieChanges,
    ) -> Result<MovieUpdate> {
        let movies = self.open_tree(MOVIES)?;
        let user_movies = self.open_tree(USER_MOVIES)?;
        let movies_unique = self.open_tree(MOVIES_UNIQUE)?;
        let movie_key = serialize_id(movie_id);
        let link = link_key(user_id, movie_id);
        let result = (&movies, &user_movies, &movies_unique).transaction(
            |(movies, user_movies, movies_unique)| {
                if user_movies.get(&link[..])?.is_none() {
                    return Err(ConflictableTransactionError::Abort(Conflict::Missing));
                }
                let mut movie: Movie = match movies.get(&movie_key[..])? {
                    Some(data) => bincode::deserialize(&data).map_err(encoding_abort)?,
                    None => return Err(ConflictableTransactionError::Abort(Conflict::Missing)),
                };
                let old_unique =
                    unique_key(user_id, &movie.title, &movie.director, movie.release_year)
                        .map_err(encoding_abort)?;
                changes.clone().apply(&mut movie);
                let new_unique =
                    unique_key(user_id, &movie.title, &movie.director, movie.release_year)
                        .map_err(encoding_abort)?;
                if new_unique != old_unique {
                    if movies_unique.get(&new_unique[..])?.is_some() {
                        return Err(ConflictableTransactionError::Abort(Conflict::Duplicate));
                    }
                    movies_unique.remove(&old_unique[..])?;
                    movies_unique.insert(&new_unique[..], &movie_key[..])?;
                }
                let data = bincode::serialize(&movie).map_err(encoding_abort)?;
                movies.insert(&movie_key[..], data)?;
                Ok(movie)
            },
        );
        match result {
            Ok(movie) => Ok(MovieUpdate::Updated(movie)),
            Err(TransactionError::Abort(Conflict::Missing)) => Ok(MovieUpdate::NotFound),
            Err(TransactionError::Abort(Conflict::Duplicate)) => Ok(MovieUpdate::Duplicate),
            Err(err) => Err(transaction_error(err)),
        }
    }

    fn delete_movie(&self, user_id: UserId, movie_id: MovieId) -> Result<Option<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        let user_movies = self.open_tree(USER_MOVIES)?;
        let movies_unique = self.open_tree(MOVIES_UNIQUE)?;
        let movie_key = serialize_id(movie_id);
        let link = link_key(user_id, movie_id);
        let result = (&movies, &user_movies, &movies_unique).transaction(
            |(movies, user_movies, movies_unique)| {
                if user_movies.remove(&link[..])?.is_none() {
                    return Err(ConflictableTransactionError::Abort(Conflict::Missing));
                }
                let movie: Movie = match movies.remove(&movie_key[..])? {
                    Some(data) => bincode::deserialize(&data).map_err(encoding_abort)?,
                    None => return Err(ConflictableTransactionError::Abort(Conflict::Missing)),
                };
                let unique =
                    unique_key(user_id, &movie.title, &movie.director, movie.release_year)
                        .map_err(encoding_abort)?;
                movies_unique.remove(&unique[..])?;
                Ok(movie)
            },
        );
        match result {
            Ok(movie) => Ok(Some(movie)),
            Err(TransactionError::Abort(Conflict::Missing)) => Ok(None),
            Err(err) => Err(transaction_error(err)),
        }
    }
}

/// Checks that every key in the ownership index points at a stored movie.
#[cfg(test)]
fn index_is_consistent(db: &sled::Db) -> Result<bool> {
    let movies = db.open_tree(MOVIES)?;
    let user_movies = db.open_tree(USER_MOVIES)?;
    for key in user_movies.iter().keys() {
        let key = key?;
        let user_id = deserialize_id(key.get(..8).ok_or(DbError::CorruptKey)?)?;
        let movie_id = deserialize_id(key.get(8..).ok_or(DbError::CorruptKey)?)?;
        match movies.get(serialize_id(movie_id))? {
            Some(data) => {
                let movie: Movie = bincode::deserialize(&data)?;
                if movie.user_id != user_id {
                    return Ok(false);
                }
            }
            None => return Ok(false),
        }
    }
    let movies_unique = db.open_tree(MOVIES_UNIQUE)?;
    Ok(user_movies.len() == movies.len() && movies_unique.len() == movies.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn new_movie(title: &str, year: i32) -> NewMovie {
        NewMovie {
            title: title.to_owned(),
            director: "Someone".to_owned(),
            release_year: year,
            poster_url: None,
            imdb_rating: Some(7.0),
        }
    }

    #[test]
    fn users() {
        let db = temp_db();
        let alice = db.add_user("  Alice ").unwrap();
        let bob = db.add_user("Bob").unwrap();
        assert_eq!(alice.name, "Alice");
        assert_eq!(db.get_user(bob.id).unwrap(), Some(bob.clone()));
        assert_eq!(db.get_user(bob.id + 100).unwrap(), None);
        assert_eq!(db.all_users().unwrap(), vec![alice, bob]);
    }

    #[test]
    fn movies_keep_insertion_order_per_user() {
        let db = temp_db();
        let alice = db.add_user("Alice").unwrap();
        let bob = db.add_user("Bob").unwrap();
        let a1 = db.add_movie(alice.id, new_movie("Zodiac", 2007)).unwrap().unwrap();
        let b1 = db.add_movie(bob.id, new_movie("Alien", 1979)).unwrap().unwrap();
        let a2 = db.add_movie(alice.id, new_movie("Arrival", 2016)).unwrap().unwrap();

        let titles: Vec<_> = db
            .user_movies(alice.id)
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Zodiac", "Arrival"]);
        assert_eq!(db.user_movies(bob.id).unwrap(), vec![b1.clone()]);
        assert_eq!(db.all_movies().unwrap().len(), 3);

        assert_eq!(db.get_user_movie(alice.id, a2.id).unwrap(), Some(a2));
        assert_eq!(db.get_user_movie(bob.id, a1.id).unwrap(), None);
        assert!(index_is_consistent(&db).unwrap());
    }

    #[test]
    fn duplicate_movie_is_rejected() {
        let db = temp_db();
        let alice = db.add_user("Alice").unwrap();
        let bob = db.add_user("Bob").unwrap();
        assert!(db.add_movie(alice.id, new_movie("Heat", 1995)).unwrap().is_some());
        assert!(db.add_movie(alice.id, new_movie("Heat", 1995)).unwrap().is_none());
        assert!(db.add_movie(alice.id, new_movie("Heat", 1986)).unwrap().is_some());
        assert!(db.add_movie(bob.id, new_movie("Heat", 1995)).unwrap().is_some());
        assert_eq!(db.user_movies(alice.id).unwrap().len(), 2);
    }

    #[test]
    fn add_movie_to_unknown_user() {
        let db = temp_db();
        match db.add_movie(42, new_movie("Heat", 1995)) {
            Err(DbError::UserNotFound(42)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn update() {
        let db = temp_db();
        let alice = db.add_user("Alice").unwrap();
        let bob = db.add_user("Bob").unwrap();
        let movie = db.add_movie(alice.id, new_movie("Heat", 1995)).unwrap().unwrap();
        let changes = MovieChanges {
            title: Some("Heat (1995)".to_owned()),
            imdb_rating: Some(8.3),
            ..MovieChanges::default()
        };
        assert_eq!(
            db.update_movie(bob.id, movie.id, changes.clone()).unwrap(),
            MovieUpdate::NotFound
        );
        assert_eq!(
            db.update_movie(alice.id, movie.id + 100, changes.clone()).unwrap(),
            MovieUpdate::NotFound
        );

        let updated = match db.update_movie(alice.id, movie.id, changes).unwrap() {
            MovieUpdate::Updated(movie) => movie,
            other => panic!("unexpected result: {:?}", other),
        };
        assert_eq!(updated.title, "Heat (1995)");
        assert_eq!(updated.director, "Someone");
        assert_eq!(updated.imdb_rating, Some(8.3));
        assert_eq!(db.get_user_movie(alice.id, movie.id).unwrap(), Some(updated));
        assert!(index_is_consistent(&db).unwrap());

        // The old identity is free again, the new one is taken.
        assert!(db.add_movie(alice.id, new_movie("Heat", 1995)).unwrap().is_some());
        assert!(db
            .add_movie(alice.id, new_movie("Heat (1995)", 1995))
            .unwrap()
            .is_none());
    }

    #[test]
    fn update_into_duplicate_is_rejected() {
        let db = temp_db();
        let alice = db.add_user("Alice").unwrap();
        let heat = db.add_movie(alice.id, new_movie("Heat", 2000)).unwrap().unwrap();
        let alien = db.add_movie(alice.id, new_movie("Alien", 2000)).unwrap().unwrap();
        let changes = MovieChanges {
            title: Some("Heat".to_owned()),
            ..MovieChanges::default()
        };
        assert_eq!(
            db.update_movie(alice.id, alien.id, changes).unwrap(),
            MovieUpdate::Duplicate
        );
        assert_eq!(db.user_movies(alice.id).unwrap(), vec![heat, alien.clone()]);

        // Changes that keep the identity are not collisions with itself.
        let changes = MovieChanges {
            title: Some("Alien".to_owned()),
            imdb_rating: Some(8.5),
            ..MovieChanges::default()
        };
        match db.update_movie(alice.id, alien.id, changes).unwrap() {
            MovieUpdate::Updated(movie) => assert_eq!(movie.imdb_rating, Some(8.5)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(index_is_consistent(&db).unwrap());
    }

    #[test]
    fn concurrent_duplicate_adds_store_one_movie() {
        let db = temp_db();
        let user_id = db.add_user("Alice").unwrap().id;
        let handles = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.add_movie(user_id, new_movie("Heat", 1995)).unwrap())
            })
            .collect::<Vec<_>>();
        let added = handles
            .into_iter()
            .filter_map(|handle| handle.join().unwrap())
            .count();
        assert_eq!(added, 1);
        assert_eq!(db.user_movies(user_id).unwrap().len(), 1);
        assert!(index_is_consistent(&db).unwrap());
    }

    #[test]
    fn update_after_delete_leaves_no_orphan() {
        let db = temp_db();
        let alice = db.add_user("Alice").unwrap();
        let heat = db.add_movie(alice.id, new_movie("Heat", 1995)).unwrap().unwrap();
        assert!(db.delete_movie(alice.id, heat.id).unwrap().is_some());
        let changes = MovieChanges {
            imdb_rating: Some(8.3),
            ..MovieChanges::default()
        };
        assert_eq!(
            db.update_movie(alice.id, heat.id, changes).unwrap(),
            MovieUpdate::NotFound
        );
        assert!(db.all_movies().unwrap().is_empty());
        assert!(index_is_consistent(&db).unwrap());
    }

    #[test]
    fn delete() {
        let db = temp_db();
        let alice = db.add_user("Alice").unwrap();
        let bob = db.add_user("Bob").unwrap();
        let heat = db.add_movie(alice.id, new_movie("Heat", 1995)).unwrap().unwrap();
        let alien = db.add_movie(alice.id, new_movie("Alien", 1979)).unwrap().unwrap();

        assert_eq!(db.delete_movie(bob.id, heat.id).unwrap(), None);
        assert_eq!(db.delete_movie(alice.id, heat.id).unwrap(), Some(heat.clone()));
        assert_eq!(db.delete_movie(alice.id, heat.id).unwrap(), None);
        assert_eq!(db.user_movies(alice.id).unwrap(), vec![alien]);
        assert!(index_is_consistent(&db).unwrap());
    }
}
