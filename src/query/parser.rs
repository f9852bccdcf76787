//! Textual query parser
//!
//! Recognizes, case-insensitively:
//!
//! ```text
//! SELECT <fn>(<metric>) FROM <metric>
//! SELECT <metric> FROM <metric>
//! ```
//!
//! with `<fn>` one of `avg`, `sum`, `min`, `max`, `count`, and an optional
//! tag selector on the FROM metric: `FROM cpu.usage{host="server1"}`.
//! Anything else fails with a syntax error. As in the rest of the engine,
//! the FROM metric is authoritative.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{map, opt},
    multi::separated_list1,
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::query::ast::{AggregateFunc, MetricRef, Statement};
use crate::query::error::{QueryError, QueryResult};
use crate::storage::TagMap;

/// Parse a query string into a [`Statement`]
pub fn parse_statement(input: &str) -> QueryResult<Statement> {
    match parse_full(input.trim()) {
        Ok((remaining, statement)) => {
            if remaining.trim().is_empty() {
                Ok(statement)
            } else {
                Err(QueryError::Syntax(format!(
                    "unexpected input after query: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Syntax(format!("parse error: {:?}", e))),
    }
}

fn parse_full(input: &str) -> IResult<&str, Statement> {
    let (input, _) = multispace0(input)?;
    let (input, _) = tag_no_case("SELECT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, select) = parse_select_item(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = tag_no_case("FROM")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, metric) = parse_metric_ref(input)?;
    let (input, _) = multispace0(input)?;

    let statement = match select {
        SelectItem::Aggregate(func) => Statement::Aggregate { func, metric },
        SelectItem::Raw => Statement::Select { metric },
    };
    Ok((input, statement))
}

enum SelectItem {
    Aggregate(AggregateFunc),
    Raw,
}

fn parse_select_item(input: &str) -> IResult<&str, SelectItem> {
    alt((
        map(parse_aggregate_call, SelectItem::Aggregate),
        map(parse_identifier, |_| SelectItem::Raw),
    ))(input)
}

fn parse_aggregate_call(input: &str) -> IResult<&str, AggregateFunc> {
    let (input, func) = parse_aggregate_func(input)?;
    let (input, _) = delimited(
        tuple((multispace0, char('('), multispace0)),
        parse_identifier,
        tuple((multispace0, char(')'))),
    )(input)?;
    Ok((input, func))
}

fn parse_aggregate_func(input: &str) -> IResult<&str, AggregateFunc> {
    alt((
        map(tag_no_case("avg"), |_| AggregateFunc::Avg),
        map(tag_no_case("sum"), |_| AggregateFunc::Sum),
        map(tag_no_case("min"), |_| AggregateFunc::Min),
        map(tag_no_case("max"), |_| AggregateFunc::Max),
        map(tag_no_case("count"), |_| AggregateFunc::Count),
    ))(input)
}

fn parse_metric_ref(input: &str) -> IResult<&str, MetricRef> {
    let (input, name) = parse_identifier(input)?;
    let (input, tags) = opt(parse_tag_selector)(input)?;

    Ok((
        input,
        MetricRef {
            name: name.to_string(),
            tags: tags.unwrap_or_default(),
        },
    ))
}

/// `{key="value", key2="value2"}`
fn parse_tag_selector(input: &str) -> IResult<&str, TagMap> {
    let (input, pairs) = delimited(
        tuple((multispace0, char('{'), multispace0)),
        separated_list1(
            tuple((multispace0, char(','), multispace0)),
            parse_tag_pair,
        ),
        tuple((multispace0, char('}'))),
    )(input)?;

    Ok((input, pairs.into_iter().collect()))
}

fn parse_tag_pair(input: &str) -> IResult<&str, (String, String)> {
    let (input, key) = parse_identifier(input)?;
    let (input, _) = tuple((multispace0, char('='), multispace0))(input)?;
    let (input, value) = parse_quoted_string(input)?;
    Ok((input, (key.to_string(), value.to_string())))
}

fn parse_quoted_string(input: &str) -> IResult<&str, &str> {
    preceded(tag("\""), terminated_quote)(input)
}

fn terminated_quote(input: &str) -> IResult<&str, &str> {
    let (input, content) = take_while(|c: char| c != '"')(input)?;
    let (input, _) = tag("\"")(input)?;
    Ok((input, content))
}

/// Metric names and tag keys: letters, digits, `_` and `.`
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.')(input)
}
