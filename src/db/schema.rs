pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS clients (
    client_id TEXT PRIMARY KEY,
    hostname TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL DEFAULT '',
    scan_range TEXT,
    state TEXT NOT NULL DEFAULT 'pending-approval',
    capacity INTEGER NOT NULL DEFAULT 1,
    last_seen TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scans (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    targets TEXT NOT NULL,
    ports TEXT NOT NULL DEFAULT '1-1000',
    scan_arguments TEXT NOT NULL DEFAULT '-sV',
    interval_minutes INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_tasks (
    task_id TEXT PRIMARY KEY,
    execution_id TEXT NOT NULL,
    scan_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    client_id TEXT NOT NULL,
    targets TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    dispatched_at TEXT,
    completed_at TEXT,
    error TEXT
);

CREATE TABLE IF NOT EXISTS scan_results (
    result_id TEXT PRIMARY KEY,
    scan_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    execution_id TEXT NOT NULL,
    completeness TEXT NOT NULL DEFAULT 'partial',
    hosts TEXT NOT NULL DEFAULT '{}',
    task_ids TEXT NOT NULL DEFAULT '[]',
    unassigned TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    frozen_at TEXT
);

CREATE TABLE IF NOT EXISTS delta_reports (
    report_id TEXT PRIMARY KEY,
    scan_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    baseline_result_id TEXT NOT NULL,
    current_result_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    new_hosts_count INTEGER NOT NULL DEFAULT 0,
    removed_hosts_count INTEGER NOT NULL DEFAULT 0,
    new_ports_count INTEGER NOT NULL DEFAULT 0,
    closed_ports_count INTEGER NOT NULL DEFAULT 0,
    changed_services_count INTEGER NOT NULL DEFAULT 0,
    has_changes INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(baseline_result_id, current_result_id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_execution ON scan_tasks(execution_id);
CREATE INDEX IF NOT EXISTS idx_tasks_scan ON scan_tasks(scan_id);
CREATE INDEX IF NOT EXISTS idx_results_scan ON scan_results(scan_id);
CREATE INDEX IF NOT EXISTS idx_reports_scan ON delta_reports(scan_id);
CREATE INDEX IF NOT EXISTS idx_clients_state ON clients(state);
";
