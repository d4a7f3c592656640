//! Approval workflow migration.
//!
//! Creates approver groups, rules with their ordered steps, requests and the
//! decision log, plus the partial unique index that keeps at most one pending
//! request per (rule, record).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: APPROVER DIRECTORY
        // ============================================================
        db.execute_unprepared(GROUPS_SQL).await?;

        // ============================================================
        // PART 2: RULES
        // ============================================================
        db.execute_unprepared(RULES_SQL).await?;
        db.execute_unprepared(RULE_STEPS_SQL).await?;

        // ============================================================
        // PART 3: REQUESTS
        // ============================================================
        db.execute_unprepared(REQUESTS_SQL).await?;
        db.execute_unprepared(REQUEST_LOGS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            r"
DROP TABLE IF EXISTS approval_request_logs CASCADE;
DROP TABLE IF EXISTS approval_requests CASCADE;
DROP TABLE IF EXISTS approval_rule_steps CASCADE;
DROP TABLE IF EXISTS approval_rules CASCADE;
DROP TABLE IF EXISTS approval_group_members CASCADE;
DROP TABLE IF EXISTS approval_groups CASCADE;
",
        )
        .await?;
        Ok(())
    }
}

const GROUPS_SQL: &str = r"
CREATE TABLE approval_groups (
    id UUID PRIMARY KEY,
    name VARCHAR(255) NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE approval_group_members (
    group_id UUID NOT NULL REFERENCES approval_groups(id) ON DELETE CASCADE,
    user_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (group_id, user_id)
);

CREATE INDEX idx_approval_group_members_user ON approval_group_members(user_id);
";

const RULES_SQL: &str = r"
CREATE TABLE approval_rules (
    id UUID PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    res_model VARCHAR(128) NOT NULL,
    operation VARCHAR(128) NOT NULL,
    condition TEXT NOT NULL DEFAULT '',
    priority INTEGER NOT NULL DEFAULT 10,
    active BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_rule_name_not_blank CHECK (btrim(name) <> '')
);

-- Gate lookup: active rules for one operation
CREATE INDEX idx_approval_rules_target ON approval_rules(res_model, operation, priority) WHERE active;
";

const RULE_STEPS_SQL: &str = r"
CREATE TABLE approval_rule_steps (
    id UUID PRIMARY KEY,
    rule_id UUID NOT NULL REFERENCES approval_rules(id) ON DELETE CASCADE,
    sequence INTEGER NOT NULL DEFAULT 10,
    approver_kind VARCHAR(16) NOT NULL,
    approver_user_id UUID,
    approver_group_id UUID REFERENCES approval_groups(id) ON DELETE RESTRICT,
    approver_label VARCHAR(255),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    -- Exactly one approver column, matching the kind
    CONSTRAINT chk_step_single_approver CHECK (
        (approver_kind = 'user' AND approver_user_id IS NOT NULL AND approver_group_id IS NULL)
        OR (approver_kind = 'group' AND approver_group_id IS NOT NULL AND approver_user_id IS NULL)
    )
);

CREATE INDEX idx_approval_rule_steps_order ON approval_rule_steps(rule_id, sequence, id);
";

const REQUESTS_SQL: &str = r"
CREATE TABLE approval_requests (
    id UUID PRIMARY KEY,
    rule_id UUID NOT NULL REFERENCES approval_rules(id) ON DELETE RESTRICT,
    res_model VARCHAR(128) NOT NULL,
    res_id BIGINT NOT NULL,
    requested_by UUID NOT NULL,
    requested_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    state VARCHAR(16) NOT NULL DEFAULT 'pending',
    current_step_id UUID REFERENCES approval_rule_steps(id) ON DELETE RESTRICT,
    call_args JSONB NOT NULL DEFAULT '{}'::jsonb,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_request_state CHECK (state IN ('pending', 'approved', 'rejected', 'cancel')),
    -- pending <=> a current step is assigned
    CONSTRAINT chk_request_step CHECK ((state = 'pending') = (current_step_id IS NOT NULL))
);

-- At most one pending request per (rule, record)
CREATE UNIQUE INDEX uq_approval_requests_pending
    ON approval_requests(rule_id, res_model, res_id)
    WHERE state = 'pending';

-- Latest request for a (rule, record)
CREATE INDEX idx_approval_requests_record
    ON approval_requests(rule_id, res_model, res_id, requested_at DESC);

CREATE INDEX idx_approval_requests_state ON approval_requests(state, requested_at DESC);
";

const REQUEST_LOGS_SQL: &str = r"
CREATE TABLE approval_request_logs (
    id UUID PRIMARY KEY,
    request_id UUID NOT NULL REFERENCES approval_requests(id) ON DELETE CASCADE,
    step_id UUID REFERENCES approval_rule_steps(id) ON DELETE SET NULL,
    decision VARCHAR(16) NOT NULL,
    decided_by UUID NOT NULL,
    decided_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    reason TEXT,
    CONSTRAINT chk_log_decision CHECK (decision IN ('approved', 'rejected'))
);

CREATE INDEX idx_approval_request_logs_request ON approval_request_logs(request_id, decided_at DESC);
";
