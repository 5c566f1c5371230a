//! Request-target grammar for the command interface.
//!
//! Targets look like `/switch_heatrod_off` or
//! `/save-config?VOLTAGE=230&MQTT_BROKER=10.0.0.2`. The route is matched with
//! `winnow` alternatives; the query is walked pair by pair so the assignments
//! can land in a fixed-capacity buffer.

use winnow::ascii::{alpha1, space1};
use winnow::combinator::{alt, eof, opt, peek, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{rest, take_till};

use super::{Command, CommandError, ConfigUpdate, FieldValue, VALUE_CAPACITY};
use crate::config::ConfigKey;
use crate::relay::RelayId;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Route {
    Switch(RelayId, bool),
    SaveConfig,
    PowerMeter,
    Config,
    Check,
    Status,
}

fn end_of_path(input: &mut &str) -> ModalResult<()> {
    peek(alt((eof, "?", "#"))).void().parse_next(input)
}

fn route(input: &mut &str) -> ModalResult<Route> {
    alt((
        terminated("/switch_heatpump_on", end_of_path)
            .value(Route::Switch(RelayId::Heatpump, true)),
        terminated("/switch_heatpump_off", end_of_path)
            .value(Route::Switch(RelayId::Heatpump, false)),
        terminated("/switch_heatrod_on", end_of_path).value(Route::Switch(RelayId::Heatrod, true)),
        terminated("/switch_heatrod_off", end_of_path)
            .value(Route::Switch(RelayId::Heatrod, false)),
        terminated("/save-config", end_of_path).value(Route::SaveConfig),
        terminated("/power_meter", end_of_path).value(Route::PowerMeter),
        terminated("/config", end_of_path).value(Route::Config),
        terminated("/check", end_of_path).value(Route::Check),
        terminated("/", end_of_path).value(Route::Status),
    ))
    .parse_next(input)
}

fn query<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let query = opt(preceded('?', take_till(0.., '#'))).parse_next(input)?;
    let _fragment = opt(preceded('#', rest)).parse_next(input)?;
    Ok(query.unwrap_or(""))
}

fn query_pair<'i>(input: &mut &'i str) -> ModalResult<(&'i str, Option<&'i str>)> {
    let key = take_till(0.., ['=', '&']).parse_next(input)?;
    let value = opt(preceded('=', take_till(0.., '&'))).parse_next(input)?;
    opt('&').parse_next(input)?;
    Ok((key, value))
}

fn request_line<'i>(input: &mut &'i str) -> ModalResult<(&'i str, &'i str)> {
    let method = terminated(alpha1, space1).parse_next(input)?;
    let target = take_till(1.., [' ', '\t']).parse_next(input)?;
    let _version = opt(preceded(space1, preceded("HTTP/", rest))).parse_next(input)?;
    Ok((method, target))
}

/// Parses a bare request target such as `/power_meter`.
pub fn parse_target(target: &str) -> Result<Command, CommandError> {
    let mut input = target;
    let route = route(&mut input).map_err(|_| CommandError::NotFound)?;
    let query = query(&mut input).map_err(|_| CommandError::Malformed)?;

    Ok(match route {
        Route::Switch(relay, enabled) => Command::Switch { relay, enabled },
        Route::SaveConfig => Command::SaveConfig(parse_query(query)?),
        Route::PowerMeter => Command::PowerMeter,
        Route::Config => Command::Config,
        Route::Check => Command::Check,
        Route::Status => Command::Status,
    })
}

/// Parses an HTTP request line (`GET /config HTTP/1.1`).
///
/// Only `GET` is served; the version suffix is optional.
pub fn parse_request_line(line: &str) -> Result<Command, CommandError> {
    let mut input = line.trim_end_matches(['\r', '\n']);
    let (method, target) = request_line(&mut input).map_err(|_| CommandError::Malformed)?;
    if !method.eq_ignore_ascii_case("GET") {
        return Err(CommandError::MethodNotAllowed);
    }
    parse_target(target)
}

fn parse_query(mut input: &str) -> Result<ConfigUpdate, CommandError> {
    let mut update = ConfigUpdate::new();
    while !input.is_empty() {
        let (raw_key, raw_value) = query_pair(&mut input).map_err(|_| CommandError::Malformed)?;
        let Some(key) = decode_component::<32>(raw_key)
            .as_deref()
            .and_then(ConfigKey::from_name)
        else {
            continue;
        };
        let value = match raw_value.map(decode_component::<VALUE_CAPACITY>) {
            Some(Some(value)) => FieldValue::Text(value),
            _ => FieldValue::Undecodable,
        };
        update.push(key, value);
    }
    Ok(update)
}

/// Percent-decodes one query component (`+` is a space).
///
/// Returns `None` for bad escapes, invalid UTF-8, or values over `N` bytes.
pub fn decode_component<const N: usize>(raw: &str) -> Option<heapless::String<N>> {
    let mut bytes = [0u8; N];
    let mut len = 0;
    let mut iter = raw.bytes();
    while let Some(byte) = iter.next() {
        let decoded = match byte {
            b'+' => b' ',
            b'%' => {
                let high = hex_value(iter.next()?)?;
                let low = hex_value(iter.next()?)?;
                (high << 4) | low
            }
            other => other,
        };
        *bytes.get_mut(len)? = decoded;
        len += 1;
    }

    let text = core::str::from_utf8(&bytes[..len]).ok()?;
    let mut out = heapless::String::new();
    out.push_str(text).ok()?;
    Some(out)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
