pub mod cat;
pub mod ls;
pub mod stat;
pub mod thumb;
