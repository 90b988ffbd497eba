fn main() {
    normalized_worm::cli::run();
}
