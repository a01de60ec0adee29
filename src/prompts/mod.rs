//! Prompt templates for each generation stage.
//!
//! Rendering is pure string substitution: no I/O, no model calls. Each
//! [`PromptStage`] variant carries the fields its template needs.
//!
//! ```
//! use sql_forge::prompts::PromptStage;
//!
//! let prompt = PromptStage::DatabaseRequests { num_requests: 3 }.render();
//! assert!(prompt.contains("3"));
//! ```

/// Asks for short descriptions of fictional company databases.
const DATABASE_REQUESTS_TEMPLATE: &str = r#"You are designing training data for a text-to-SQL model.

Write {num_requests} distinct requests for a company's relational database. Each request is one paragraph written as if by the company itself: what the business does, which entities it tracks (customers, orders, staff, inventory, ...) and how they relate.

## Requirements

- Vary the industries (retail, logistics, healthcare, education, finance, hospitality, ...)
- Mention 4 to 8 entities per request, with at least one many-to-many relationship
- No two requests may describe the same kind of business

Return a JSON object with a single key "descriptions" holding the list of requests."#;

/// Asks for SQLAlchemy models realizing one database request.
const SCHEMA_CODE_TEMPLATE: &str = r#"You are a senior Python developer.

Write SQLAlchemy ORM models for the following database request:

{database_request}

## Requirements

- One model class per entity, with primary keys, foreign keys and relationships
- Use realistic column types and constraints (nullable, unique, lengths)
- The script must create the tables in a SQLite database when executed, using `create_engine("sqlite:///database.db")` and `Base.metadata.create_all(engine)`
- Do not insert any data

Answer with a single ```python code block and nothing else."#;

/// Asks for a script that fills the schema with synthetic rows.
///
/// The script is run as `<script> --input <models file> --output <database>`.
const POPULATION_SCRIPT_TEMPLATE: &str = r#"You are a senior Python developer.

The following SQLAlchemy models define a SQLite database:

```python
{orm_code}
```

Write a standalone Python script that populates this database with realistic synthetic data.

## Requirements

- Parse arguments with `argparse`: `--input`/`-i` (required, path to the models file above) and `--output`/`-o` (path to the SQLite database, default "output.db")
- Load the models from `--input` with `importlib.util.spec_from_file_location` and `module_from_spec`; do not re-declare them and do not use a plain `import`
- Connect with `create_engine(f"sqlite:///{args.output}")`
- Insert between 10 and 50 rows per table, respecting every foreign key and unique constraint
- Insert parent rows before child rows, `flush()` to obtain generated ids, and commit once at the end
- Use only the standard library and SQLAlchemy

## Skeleton

```python
import argparse
import importlib.util

from sqlalchemy import create_engine
from sqlalchemy.orm import sessionmaker


def load_models(path):
    spec = importlib.util.spec_from_file_location("models", path)
    models = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(models)
    return models


def main():
    parser = argparse.ArgumentParser()
    parser.add_argument("--input", "-i", required=True)
    parser.add_argument("--output", "-o", default="output.db")
    args = parser.parse_args()

    models = load_models(args.input)
    engine = create_engine(f"sqlite:///{args.output}")
    models.Base.metadata.create_all(engine)
    session = sessionmaker(bind=engine)()
    try:
        ...  # insert rows through models.<ClassName>(...)
        session.commit()
    finally:
        session.close()


if __name__ == "__main__":
    main()
```

Answer with a single ```python code block and nothing else."#;

/// Asks for natural-language questions paired with their SQL.
const QUESTIONS_TEMPLATE: &str = r#"You are creating evaluation data for a text-to-SQL model.

The database is defined by these SQLAlchemy models:

```python
{orm_code}
```

Write 10 questions a business analyst could ask about this data, each paired with the SQLite query that answers it.

## Requirements

- Use the exact table and column names created by the models
- Mix difficulty: simple filters, aggregations, multi-table joins, grouping with HAVING, subqueries
- Every query must be a single valid SQLite statement

Return a JSON object with a single key "questions" holding a list of objects with the keys "question" and "sql"."#;

/// One generation stage together with its input fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptStage {
    /// Ask for `num_requests` company database descriptions.
    DatabaseRequests { num_requests: usize },
    /// Ask for ORM schema code for one description.
    SchemaCode { database_request: String },
    /// Ask for a script populating the database defined by `orm_code`.
    PopulationScript { orm_code: String },
    /// Ask for question/SQL pairs over the database defined by `orm_code`.
    Questions { orm_code: String },
}

impl PromptStage {
    /// Stage name used in logs and retry labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DatabaseRequests { .. } => "database_requests",
            Self::SchemaCode { .. } => "schema_code",
            Self::PopulationScript { .. } => "population_script",
            Self::Questions { .. } => "questions",
        }
    }

    /// Renders the prompt text for this stage.
    pub fn render(&self) -> String {
        match self {
            Self::DatabaseRequests { num_requests } => {
                DATABASE_REQUESTS_TEMPLATE.replace("{num_requests}", &num_requests.to_string())
            }
            Self::SchemaCode { database_request } => {
                SCHEMA_CODE_TEMPLATE.replace("{database_request}", database_request.trim())
            }
            Self::PopulationScript { orm_code } => {
                POPULATION_SCRIPT_TEMPLATE.replace("{orm_code}", orm_code.trim())
            }
            Self::Questions { orm_code } => QUESTIONS_TEMPLATE.replace("{orm_code}", orm_code.trim()),
        }
    }
}
