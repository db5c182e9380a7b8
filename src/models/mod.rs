pub mod models;

pub use models::{Actor, Comment, Follow, Group, Post, TokenData, User};
