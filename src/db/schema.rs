/// Schema for the local store. Every statement is idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    permissions TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id TEXT NOT NULL UNIQUE,
    username TEXT NOT NULL,
    display_name TEXT,
    email TEXT,
    role_id INTEGER REFERENCES roles(id)
);

CREATE INDEX IF NOT EXISTS idx_users_role ON users(role_id);

CREATE TABLE IF NOT EXISTS layers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    url TEXT
);

-- Geometry rows are written before the feature that references them
CREATE TABLE IF NOT EXISTS staticfeature_geometries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    geometry TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS staticfeatures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id TEXT NOT NULL UNIQUE,
    layer_id INTEGER NOT NULL REFERENCES layers(id),
    geometry_id INTEGER NOT NULL UNIQUE REFERENCES staticfeature_geometries(id)
);

CREATE INDEX IF NOT EXISTS idx_staticfeatures_layer ON staticfeatures(layer_id);

CREATE TABLE IF NOT EXISTS staticfeature_properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    staticfeature_id INTEGER NOT NULL REFERENCES staticfeatures(id),
    key TEXT NOT NULL,
    value TEXT,
    UNIQUE (staticfeature_id, key)
);

-- Process-wide markers such as "layers fetched once"
CREATE TABLE IF NOT EXISTS flags (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
