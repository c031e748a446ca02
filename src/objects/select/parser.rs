//! Select expression parser
//!
//! Parses the single-object select dialect into a [`SelectStatement`].
//!
//! # Supported Syntax
//!
//! ```text
//! SELECT * | path [, path ...]
//! FROM S3Object [[AS] alias]
//! [WHERE path op literal [AND path op literal ...]]
//! [LIMIT n]
//! ```
//!
//! Paths are dotted identifiers (`s.metadata.host`); a leading alias or
//! `S3Object` segment is dropped. Operators are `= == != <> < <= > >=` and
//! `LIKE`. Literals are single-quoted strings (`''` escapes a quote), numbers
//! and `true`/`false`.
//!
//! # Examples
//!
//! ```text
//! SELECT * FROM S3Object s WHERE s.timestamp >= 0 AND s.timestamp <= 3599999
//! SELECT s.host, s.cpu FROM S3Object s WHERE s.host LIKE 'web-%' LIMIT 10
//! ```

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, one_of},
    combinator::{map, map_res, opt, recognize, value, verify},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use super::{CompareOp, Condition, FieldPath, Literal, Predicate, Projection, SelectStatement};
use crate::query::pattern::like_regex;
use crate::query::{QueryError, QueryResult};

const RESERVED: [&str; 5] = ["WHERE", "LIMIT", "AND", "FROM", "AS"];

/// Parse a select expression
pub fn parse_select(input: &str) -> QueryResult<SelectStatement> {
    let input = input.trim();

    match parse_full_select(input) {
        Ok((remaining, statement)) => {
            if remaining.trim().is_empty() {
                Ok(statement)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after select: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Parse(format!("{:?}", e))),
    }
}

/// Parse the full statement
fn parse_full_select(input: &str) -> IResult<&str, SelectStatement> {
    let (input, _) = multispace0(input)?;
    let (input, projection) = parse_projection(input)?;
    let (input, _) = multispace1(input)?;
    let (input, alias) = parse_from_clause(input)?;
    let (input, conditions) = opt(preceded(multispace1, parse_where_clause))(input)?;
    let (input, limit) = opt(preceded(multispace1, parse_limit_clause))(input)?;
    let (input, _) = multispace0(input)?;

    let strip = |path: FieldPath| path.without_source(alias.as_deref());
    let projection = match projection {
        Projection::All => Projection::All,
        Projection::Paths(paths) => Projection::Paths(paths.into_iter().map(strip).collect()),
    };
    let conditions = conditions
        .unwrap_or_default()
        .into_iter()
        .map(|c| Condition {
            path: strip(c.path),
            predicate: c.predicate,
        })
        .collect();

    Ok((
        input,
        SelectStatement {
            projection,
            conditions,
            limit,
        },
    ))
}

/// Parse `SELECT *` or `SELECT path, ...`
fn parse_projection(input: &str) -> IResult<&str, Projection> {
    let (input, _) = tag_no_case("SELECT")(input)?;
    let (input, _) = multispace1(input)?;

    alt((
        value(Projection::All, char('*')),
        map(
            separated_list1(delimited(multispace0, char(','), multispace0), parse_path),
            Projection::Paths,
        ),
    ))(input)
}

/// Parse `FROM S3Object [[AS] alias]`, returning the alias
fn parse_from_clause(input: &str) -> IResult<&str, Option<String>> {
    let (input, _) = tag_no_case("FROM")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = tag_no_case("S3Object")(input)?;
    let (input, alias) = opt(preceded(
        pair(multispace1, opt(pair(tag_no_case("AS"), multispace1))),
        parse_alias,
    ))(input)?;
    Ok((input, alias.map(str::to_string)))
}

fn parse_alias(input: &str) -> IResult<&str, &str> {
    verify(parse_identifier, |name: &str| {
        !RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
    })(input)
}

/// Parse WHERE clause
fn parse_where_clause(input: &str) -> IResult<&str, Vec<Condition>> {
    let (input, _) = tag_no_case("WHERE")(input)?;
    let (input, _) = multispace1(input)?;

    separated_list1(
        delimited(multispace1, tag_no_case("AND"), multispace1),
        parse_condition,
    )(input)
}

/// Parse a single condition
fn parse_condition(input: &str) -> IResult<&str, Condition> {
    let (input, path) = parse_path(input)?;
    let (input, predicate) = alt((parse_like, parse_comparison))(input)?;
    Ok((input, Condition { path, predicate }))
}

/// Parse `LIKE 'pattern'`
fn parse_like(input: &str) -> IResult<&str, Predicate> {
    let (input, _) = multispace1(input)?;
    let (input, _) = tag_no_case("LIKE")(input)?;
    let (input, _) = multispace1(input)?;
    map_res(parse_quoted_string, |pattern| {
        like_regex(&pattern).map(Predicate::Like)
    })(input)
}

/// Parse `op literal`
fn parse_comparison(input: &str) -> IResult<&str, Predicate> {
    let (input, _) = multispace0(input)?;
    let (input, op) = parse_operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, literal) = parse_literal(input)?;
    Ok((input, Predicate::Compare(op, literal)))
}

/// Parse LIMIT clause
fn parse_limit_clause(input: &str) -> IResult<&str, usize> {
    let (input, _) = tag_no_case("LIMIT")(input)?;
    let (input, _) = multispace1(input)?;
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

/// Parse comparison operator
fn parse_operator(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Gte, tag(">=")),
        value(CompareOp::Lte, tag("<=")),
        value(CompareOp::Ne, alt((tag("!="), tag("<>")))),
        value(CompareOp::Gt, tag(">")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Eq, alt((tag("=="), tag("=")))),
    ))(input)
}

/// Parse a literal value
fn parse_literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(parse_quoted_string, Literal::String),
        map(parse_number, Literal::Number),
        value(Literal::Bool(true), tag_no_case("true")),
        value(Literal::Bool(false), tag_no_case("false")),
    ))(input)
}

/// Parse a dotted path
fn parse_path(input: &str) -> IResult<&str, FieldPath> {
    map(
        separated_list1(char('.'), parse_path_segment),
        |segments| FieldPath { segments },
    )(input)
}

fn parse_path_segment(input: &str) -> IResult<&str, String> {
    alt((
        map(parse_identifier, str::to_string),
        map(
            delimited(char('"'), take_while1(|c| c != '"'), char('"')),
            |s: &str| s.to_string(),
        ),
    ))(input)
}

/// Parse identifier
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse quoted string, `''` standing for one quote
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('\'')(input)?;
    let (input, parts) = many0(alt((
        map(is_not("'"), str::to_string),
        value("'".to_string(), tag("''")),
    )))(input)?;
    let (input, _) = char('\'')(input)?;
    Ok((input, parts.concat()))
}

/// Parse floating point number
fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> FieldPath {
        FieldPath {
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_select_all() {
        let statement = parse_select("SELECT * FROM S3Object").unwrap();
        assert!(matches!(statement.projection, Projection::All));
        assert!(statement.conditions.is_empty());
        assert_eq!(statement.limit, None);
    }

    #[test]
    fn test_parse_alias_is_stripped() {
        let statement =
            parse_select("select s.metadata.host, s.cpu from s3object as s limit 5").unwrap();
        match statement.projection {
            Projection::Paths(paths) => {
                assert_eq!(paths, vec![path(&["metadata", "host"]), path(&["cpu"])]);
            }
            Projection::All => panic!("expected paths"),
        }
        assert_eq!(statement.limit, Some(5));
    }

    #[test]
    fn test_parse_source_prefix_is_stripped() {
        let statement = parse_select("SELECT S3Object.name FROM S3Object").unwrap();
        match statement.projection {
            Projection::Paths(paths) => assert_eq!(paths, vec![path(&["name"])]),
            Projection::All => panic!("expected paths"),
        }
    }

    #[test]
    fn test_parse_where_conditions() {
        let statement = parse_select(
            "SELECT * FROM S3Object s WHERE s.timestamp >= -10 AND s.timestamp<=3.5e3 AND s.name = 'it''s' AND s.ok != true",
        )
        .unwrap();
        assert_eq!(statement.conditions.len(), 4);

        let c = &statement.conditions[0];
        assert_eq!(c.path, path(&["timestamp"]));
        assert!(matches!(c.predicate, Predicate::Compare(CompareOp::Gte, Literal::Number(n)) if n == -10.0));

        let c = &statement.conditions[1];
        assert!(matches!(c.predicate, Predicate::Compare(CompareOp::Lte, Literal::Number(n)) if n == 3500.0));

        let c = &statement.conditions[2];
        assert!(matches!(&c.predicate, Predicate::Compare(CompareOp::Eq, Literal::String(s)) if s == "it's"));

        let c = &statement.conditions[3];
        assert!(matches!(c.predicate, Predicate::Compare(CompareOp::Ne, Literal::Bool(true))));
    }

    #[test]
    fn test_parse_like() {
        let statement = parse_select("SELECT * FROM S3Object WHERE host LIKE 'web-%'").unwrap();
        match &statement.conditions[0].predicate {
            Predicate::Like(regex) => {
                assert!(regex.is_match("web-01"));
                assert!(!regex.is_match("db-01"));
            }
            Predicate::Compare(..) => panic!("expected LIKE"),
        }
    }

    #[test]
    fn test_parse_quoted_identifier() {
        let statement = parse_select("SELECT \"first name\" FROM S3Object").unwrap();
        match statement.projection {
            Projection::Paths(paths) => assert_eq!(paths, vec![path(&["first name"])]),
            Projection::All => panic!("expected paths"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_select("").is_err());
        assert!(parse_select("SELECT").is_err());
        assert!(parse_select("SELECT * FROM table").is_err());
        assert!(parse_select("SELECT * FROM S3Object WHERE").is_err());
        assert!(parse_select("SELECT * FROM S3Object WHERE a >").is_err());
        assert!(parse_select("SELECT * FROM S3Object LIMIT x").is_err());
        assert!(parse_select("SELECT * FROM S3Object s t").is_err());
    }
}
