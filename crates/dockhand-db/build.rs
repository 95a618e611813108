//! Build script so embedded migrations are picked up when they change.
//!
//! `sqlx::migrate!` embeds `migrations/` at compile time, but cargo does not
//! know to rebuild when a new migration file is added.

fn main() {
    println!("cargo:rerun-if-changed=migrations/");
}
