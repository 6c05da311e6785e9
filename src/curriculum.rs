//! SQL course curriculum.
//!
//! Maps each course week to the SQL concepts introduced that week. The
//! curriculum is cumulative: a concept stays allowed in every later week, and
//! anything not yet taught is forbidden in tutor examples.

/// Concepts introduced in one course week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurriculumWeek {
    pub week: u32,
    pub concepts: &'static [&'static str],
}

pub const LAST_COURSE_WEEK: u32 = 13;

pub const SQL_CURRICULUM: &[CurriculumWeek] = &[
    CurriculumWeek {
        week: 1,
        concepts: &["CREATE TABLE", "DDL", "CREATE", "TABLE"],
    },
    CurriculumWeek {
        week: 2,
        concepts: &["SELECT", "constraints", "CONSTRAINT"],
    },
    CurriculumWeek {
        week: 3,
        concepts: &["FROM", "WHERE", "BETWEEN", "LIKE"],
    },
    CurriculumWeek {
        week: 4,
        concepts: &["GROUP BY", "aggregation"],
    },
    CurriculumWeek {
        week: 5,
        concepts: &["functions", "variables", "SQL functions"],
    },
    CurriculumWeek {
        week: 6,
        concepts: &["COUNT", "DISTINCT", "GROUP BY advanced"],
    },
    CurriculumWeek {
        week: 7,
        concepts: &["JOIN", "ON", "USING", "INNER JOIN", "LEFT JOIN", "RIGHT JOIN"],
    },
    CurriculumWeek {
        week: 8,
        concepts: &["NULL", "INSERT", "UPDATE", "DELETE", "DML"],
    },
    CurriculumWeek {
        week: 9,
        concepts: &["subquery", "sub-query", "nested query"],
    },
    CurriculumWeek {
        week: 10,
        concepts: &[
            "primary key",
            "foreign key",
            "PRIMARY KEY",
            "FOREIGN KEY",
            "key constraints",
        ],
    },
    CurriculumWeek {
        week: 11,
        concepts: &["ALTER", "ALTER TABLE", "indexes", "INDEX", "CREATE INDEX"],
    },
    CurriculumWeek {
        week: 12,
        concepts: &[
            "DROP",
            "DROP TABLE",
            "VIEWS",
            "VIEW",
            "CREATE VIEW",
            "temporary tables",
            "temporary table",
        ],
    },
    CurriculumWeek {
        week: 13,
        concepts: &[
            "triggers",
            "TRIGGER",
            "CREATE TRIGGER",
            "virtual tables",
            "virtual table",
        ],
    },
];

#[must_use]
pub fn curriculum_week(week: u32) -> Option<&'static CurriculumWeek> {
    SQL_CURRICULUM.iter().find(|w| w.week == week)
}

/// Every concept taught up to and including `week`, first occurrence wins.
#[must_use]
pub fn allowed_concepts(week: u32) -> Vec<&'static str> {
    dedup(
        SQL_CURRICULUM
            .iter()
            .filter(|w| w.week <= week)
            .flat_map(|w| w.concepts.iter().copied()),
    )
}

/// Every curriculum concept not yet taught by `week`.
#[must_use]
pub fn forbidden_concepts(week: u32) -> Vec<&'static str> {
    let allowed = allowed_concepts(week);
    dedup(SQL_CURRICULUM.iter().flat_map(|w| w.concepts.iter().copied()))
        .into_iter()
        .filter(|concept| !allowed.contains(concept))
        .collect()
}

/// Case-insensitive: equal to, or containing, an allowed concept.
#[must_use]
pub fn is_concept_allowed(concept: &str, week: u32) -> bool {
    matches_any(concept, &allowed_concepts(week))
}

/// Case-insensitive: equal to, or containing, a forbidden concept.
#[must_use]
pub fn is_concept_forbidden(concept: &str, week: u32) -> bool {
    matches_any(concept, &forbidden_concepts(week))
}

fn matches_any(concept: &str, candidates: &[&str]) -> bool {
    let concept = concept.to_lowercase();
    candidates.iter().any(|c| {
        let c = c.to_lowercase();
        concept == c || concept.contains(&c)
    })
}

fn dedup(concepts: impl Iterator<Item = &'static str>) -> Vec<&'static str> {
    let mut seen = Vec::new();
    for concept in concepts {
        if !seen.contains(&concept) {
            seen.push(concept);
        }
    }
    seen
}
