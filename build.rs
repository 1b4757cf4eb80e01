fn main() {
    // Recompile if migrations change (sqlx::migrate! embeds them)
    println!("cargo:rerun-if-changed=migrations");
}
