//! Application-level configuration constants.

// Search input shape
pub const LETTER_COUNT: usize = 7;
pub const MIN_WORD_LENGTH: usize = 3;
pub const MAX_WORD_LENGTH: usize = 7;
pub const BONUS_ROW_COUNT: usize = MAX_WORD_LENGTH - MIN_WORD_LENGTH + 1;
pub const MIN_ROUND: i64 = 1;
pub const MAX_ROUND: i64 = 5;

// Ranking
pub const TOP_PER_LENGTH: usize = 10;

// Word source
pub const DEFAULT_ENDPOINT: &str = "/api/buscar-palabras";
pub const DEFAULT_REJECTION_MESSAGE: &str = "The word source could not complete the search";

// Offline cache
pub const CACHE_VERSION: &str = "v1";
pub const PRIMARY_CACHE_PREFIX: &str = "primary";
pub const EXTERNAL_CACHE_PREFIX: &str = "external";
pub const API_PATH_MARKER: &str = "/api/";
pub const API_HOST_PATTERN: &str = r"^api\.";
pub const OFFLINE_MESSAGE: &str =
    "You are offline. Check your internet connection and try the search again.";

/// Same-origin assets that must all be cached for install to succeed.
pub const PRECACHE_URLS: &[&str] = &[
    "/",
    "/index.html",
    "/styles.css",
    "/app.js",
    "/best_word_bg.wasm",
    "/manifest.json",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
];

/// Third-party assets cached on a best-effort basis.
pub const EXTERNAL_PRECACHE_URLS: &[&str] = &[
    "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css",
    "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/js/bootstrap.bundle.min.js",
    "https://cdn.jsdelivr.net/npm/bootstrap-icons@1.11.3/font/bootstrap-icons.min.css",
];
