use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_pool(path: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    // Enable WAL mode for better concurrent read performance
    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        -- Settings (key-value)
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        -- Users; profile_json carries the role-specific fields
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            password_hash TEXT,
            role TEXT NOT NULL,
            profile_json TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'inactive',
            verified INTEGER NOT NULL DEFAULT 0,
            last_login_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- Cookie sessions
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at DATETIME NOT NULL,
            expires_at DATETIME NOT NULL,
            ip_address TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        -- Single-use email tokens (magic link, reset, verification, recovery)
        CREATE TABLE IF NOT EXISTS auth_tokens (
            token TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            purpose TEXT NOT NULL,
            expires_at DATETIME NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- Schools
        CREATE TABLE IF NOT EXISTS schools (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            country TEXT NOT NULL,
            province TEXT NOT NULL DEFAULT '',
            district TEXT NOT NULL DEFAULT '',
            sector TEXT,
            cell TEXT,
            village TEXT,
            contact_email TEXT NOT NULL,
            created_by INTEGER NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (created_by) REFERENCES users(id)
        );

        -- Leagues
        CREATE TABLE IF NOT EXISTS leagues (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- Tournaments
        CREATE TABLE IF NOT EXISTS tournaments (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT UNIQUE NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            format TEXT NOT NULL,
            speaking_times_json TEXT NOT NULL DEFAULT '{}',
            league_id INTEGER,
            location TEXT NOT NULL DEFAULT '',
            fee REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft',
            created_by INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (league_id) REFERENCES leagues(id),
            FOREIGN KEY (created_by) REFERENCES users(id)
        );

        -- Tournament invitations (one per school)
        CREATE TABLE IF NOT EXISTS invitations (
            id INTEGER PRIMARY KEY,
            tournament_id INTEGER NOT NULL,
            school_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            responded_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (tournament_id) REFERENCES tournaments(id),
            FOREIGN KEY (school_id) REFERENCES schools(id),
            UNIQUE(tournament_id, school_id)
        );

        -- Teams
        CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY,
            tournament_id INTEGER NOT NULL,
            school_id INTEGER,
            name TEXT NOT NULL,
            members_json TEXT NOT NULL DEFAULT '[]',
            confirmed INTEGER NOT NULL DEFAULT 0,
            payment_status TEXT NOT NULL DEFAULT 'pending',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (tournament_id) REFERENCES tournaments(id),
            FOREIGN KEY (school_id) REFERENCES schools(id),
            UNIQUE(tournament_id, name)
        );

        -- Rounds
        CREATE TABLE IF NOT EXISTS rounds (
            id INTEGER PRIMARY KEY,
            tournament_id INTEGER NOT NULL,
            number INTEGER NOT NULL,
            round_type TEXT NOT NULL,
            motion TEXT NOT NULL DEFAULT '',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (tournament_id) REFERENCES tournaments(id),
            UNIQUE(tournament_id, number)
        );

        -- Debates
        CREATE TABLE IF NOT EXISTS debates (
            id INTEGER PRIMARY KEY,
            round_id INTEGER NOT NULL,
            proposition_team_id INTEGER NOT NULL,
            opposition_team_id INTEGER NOT NULL,
            judges_json TEXT NOT NULL DEFAULT '[]',
            room TEXT NOT NULL DEFAULT '',
            winner_team_id INTEGER,
            live_json TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (round_id) REFERENCES rounds(id),
            FOREIGN KEY (proposition_team_id) REFERENCES teams(id),
            FOREIGN KEY (opposition_team_id) REFERENCES teams(id)
        );

        -- In-app notifications
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            link TEXT,
            is_read INTEGER NOT NULL DEFAULT 0,
            expires_at DATETIME,
            email_sent INTEGER NOT NULL DEFAULT 0,
            push_sent INTEGER NOT NULL DEFAULT 0,
            sms_sent INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        -- Web Push subscriptions
        CREATE TABLE IF NOT EXISTS push_subscriptions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            endpoint TEXT UNIQUE NOT NULL,
            p256dh TEXT NOT NULL,
            auth TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        -- Fee waiver codes
        CREATE TABLE IF NOT EXISTS waiver_codes (
            id INTEGER PRIMARY KEY,
            tournament_id INTEGER NOT NULL,
            code TEXT UNIQUE NOT NULL,
            usage_limit INTEGER NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 0,
            expires_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (tournament_id) REFERENCES tournaments(id)
        );

        -- Offline read cache
        CREATE TABLE IF NOT EXISTS offline_cache (
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            written_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        CREATE INDEX IF NOT EXISTS idx_teams_tournament ON teams(tournament_id);
        CREATE INDEX IF NOT EXISTS idx_debates_round ON debates(round_id);
        CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);
        CREATE INDEX IF NOT EXISTS idx_push_user ON push_subscriptions(user_id);
        CREATE INDEX IF NOT EXISTS idx_auth_tokens_expires ON auth_tokens(expires_at);
        ",
    )?;

    Ok(())
}

pub fn seed_defaults(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    let defaults = vec![
        ("site_name", "iRankHub"),
        ("site_url", "http://localhost:8000"),
        ("admin_email", ""),
        // Email
        ("email_provider", "log"),
        ("email_from_address", ""),
        ("email_smtp_host", ""),
        ("email_smtp_port", "587"),
        ("email_smtp_username", ""),
        ("email_smtp_password", ""),
        ("email_resend_api_key", ""),
        // Sessions
        ("session_expiry_hours", "24"),
        // Notifications
        ("notifications_email_enabled", "true"),
        ("notifications_push_enabled", "true"),
        ("push_icon", "/static/icons/icon-192.png"),
        ("push_badge", "/static/icons/badge-72.png"),
        ("push_ttl_secs", "86400"),
        // VAPID key pair (base64url, raw P-256); push is skipped until set
        ("push_vapid_public_key", ""),
        ("push_vapid_private_key", ""),
        ("push_vapid_subject", ""),
        // Peer sync; generated on first boot
        ("sync_device_id", ""),
    ];

    for (key, value) in defaults {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }

    Ok(())
}
