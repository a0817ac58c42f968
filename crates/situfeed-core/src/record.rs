//! Typed view over situation records.
//!
//! A [`SituationRecord`] keeps the full parsed [`Object`] for the
//! transformer and pulls out the handful of fields the relay needs for
//! routing and scheduling: identity, validity window, region and cause.

use crate::error::FetchError;
use crate::node::{Node, Object};
use crate::topic::normalize_for_topic;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Region or event type used when the record carries none.
pub const UNKNOWN: &str = "unknown";

/// Record type whose event type is taken from its cause.
pub const GENERIC_RECORD_TYPE: &str = "GenericSituationRecord";

#[derive(Debug, Clone, PartialEq)]
pub struct SituationRecord {
    pub id: String,
    pub version: String,
    pub record_type: String,
    pub validity_start: Option<OffsetDateTime>,
    pub validity_end: Option<OffsetDateTime>,
    pub location: Location,
    pub cause: Option<Cause>,
    pub body: Object,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Location {
    Linear(LinearLocation),
    Point(PointLocation),
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearLocation {
    pub road: Option<String>,
    pub direction: Option<String>,
    pub from: Option<LocationPoint>,
    pub to: Option<LocationPoint>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointLocation {
    pub road: Option<String>,
    pub direction: Option<String>,
    pub point: Option<LocationPoint>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocationPoint {
    /// Province the point lies in; drives topic routing.
    pub region: Option<String>,
    /// Autonomous community.
    pub state: Option<String>,
    pub km: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cause {
    pub cause_type: Option<String>,
    /// Detailed subtype tags from every upstream subtype enumeration.
    pub subtypes: Vec<String>,
}

impl SituationRecord {
    /// Builds a record from a parsed `situationRecord` element.
    ///
    /// `id` and `version` are mandatory; everything else degrades to `None`
    /// or [`Location::Unknown`] when missing.
    pub fn from_object(body: Object) -> Result<Self, FetchError> {
        let id = required(&body, "id")?;
        let version = required(&body, "version")?;

        let validity_start = timestamp(&body, "overallStartTime");
        let validity_end = timestamp(&body, "overallEndTime");
        let location = body
            .object("locationReference")
            .map(Location::from_object)
            .unwrap_or_default();
        let cause = body.object("cause").map(Cause::from_object);

        Ok(Self {
            id,
            version,
            record_type: body.type_name.clone(),
            validity_start,
            validity_end,
            location,
            cause,
            body,
        })
    }

    /// `id:version`, the identity of one release.
    pub fn key(&self) -> String {
        format!("{}:{}", self.id, self.version)
    }

    /// Raw region name, `"unknown"` when the location has none.
    pub fn region(&self) -> &str {
        self.location.region().unwrap_or(UNKNOWN)
    }

    /// Raw event type: the cause for generic records, else the record type.
    pub fn event_type(&self) -> &str {
        if self.record_type == GENERIC_RECORD_TYPE {
            return self
                .cause
                .as_ref()
                .and_then(|c| c.cause_type.as_deref())
                .unwrap_or(UNKNOWN);
        }
        &self.record_type
    }

    /// Tracked-state summary of this record.
    pub fn known(&self) -> KnownRecord {
        KnownRecord {
            id: self.id.clone(),
            version: self.version.clone(),
            region: normalize_for_topic(self.region()),
            event_type: normalize_for_topic(self.event_type()),
        }
    }
}

fn required(body: &Object, name: &str) -> Result<String, FetchError> {
    body.text_of(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            FetchError::Malformed(format!(
                "{} record without `{}`",
                body.type_name, name
            ))
        })
}

fn timestamp(body: &Object, field: &str) -> Option<OffsetDateTime> {
    let raw = body
        .path(&["validity", "validityTimeSpecification", field])
        .and_then(Node::enum_string)?;
    parse_timestamp(&raw)
}

/// Parses an `xs:dateTime`. Values without an offset are taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT).map(PrimitiveDateTime::assume_utc))
        .ok()
}

impl Location {
    fn from_object(obj: &Object) -> Self {
        let road = obj
            .path(&["supplementaryPositionalDescription", "roadInformation", "roadNumber"])
            .and_then(Node::enum_string);

        if let Some(linear) = obj.object("tpegLinearLocation") {
            return Location::Linear(LinearLocation {
                road,
                direction: linear.text_of("tpegDirection"),
                from: linear.object("from").map(LocationPoint::from_object),
                to: linear.object("to").map(LocationPoint::from_object),
            });
        }
        if let Some(point_location) = obj.object("tpegPointLocation") {
            return Location::Point(PointLocation {
                road,
                direction: point_location.text_of("tpegDirection"),
                point: point_location.object("point").map(LocationPoint::from_object),
            });
        }
        Location::Unknown
    }

    /// First region tag available: `from`, then `to`, or the single point.
    pub fn region(&self) -> Option<&str> {
        let found = match self {
            Location::Linear(l) => [l.from.as_ref(), l.to.as_ref()]
                .into_iter()
                .flatten()
                .find_map(|p| p.region.as_deref()),
            Location::Point(p) => p.point.as_ref().and_then(|p| p.region.as_deref()),
            Location::Unknown => None,
        };
        found.filter(|r| !r.trim().is_empty())
    }
}

impl LocationPoint {
    fn from_object(obj: &Object) -> Self {
        let extended = obj
            .object("tpegNonJunctionPointExtension")
            .and_then(|ext| ext.object("extendedTpegNonJunctionPoint"));
        let coordinate = |name: &str| {
            obj.path(&["pointCoordinates", name]).and_then(|n| match n {
                Node::Scalar(s) => s.as_f64(),
                _ => None,
            })
        };
        Self {
            region: extended.and_then(|e| e.text_of("province")),
            state: extended.and_then(|e| e.text_of("autonomousCommunity")),
            km: extended
                .and_then(|e| e.get("kilometerPoint"))
                .and_then(|n| match n {
                    Node::Scalar(s) => s.as_f64(),
                    _ => None,
                }),
            latitude: coordinate("latitude"),
            longitude: coordinate("longitude"),
        }
    }
}

impl Cause {
    fn from_object(obj: &Object) -> Self {
        let subtypes = obj
            .object("detailedCauseType")
            .map(|detail| {
                detail
                    .fields
                    .iter()
                    .filter(|(name, _)| !name.ends_with("Extension"))
                    .flat_map(|(_, node)| node.enum_strings())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            cause_type: obj.text_of("causeType"),
            subtypes,
        }
    }
}

/// Minimal memory of what was last published for an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownRecord {
    pub id: String,
    pub version: String,
    pub region: String,
    pub event_type: String,
}

/// Payload of a deletion notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deletion {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub deleted_at: OffsetDateTime,
}

/// One situation grouping related records.
#[derive(Debug, Clone, PartialEq)]
pub struct Situation {
    pub id: Option<String>,
    pub records: Vec<SituationRecord>,
}

/// A parsed feed document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Publication {
    pub publication_time: Option<OffsetDateTime>,
    pub situations: Vec<Situation>,
}

impl Publication {
    pub fn record_count(&self) -> usize {
        self.situations.iter().map(|s| s.records.len()).sum()
    }

    /// All records in document order.
    pub fn into_records(self) -> Vec<SituationRecord> {
        self.situations
            .into_iter()
            .flat_map(|s| s.records)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Scalar;

    fn extended_point(province: &str) -> Node {
        Node::Object(
            Object::new("TpegNonJunctionPoint").with(
                "tpegNonJunctionPointExtension",
                Node::Object(
                    Object::new("TpegNonJunctionPointExtension").with(
                        "extendedTpegNonJunctionPoint",
                        Node::Object(
                            Object::new("ExtendedTpegNonJunctionPoint")
                                .with("province", Node::text(province))
                                .with("kilometerPoint", Node::Scalar(Scalar::Float(12.5))),
                        ),
                    ),
                ),
            ),
        )
    }

    fn record(location: Option<Node>) -> Object {
        let mut body = Object::new("MaintenanceWorks")
            .with("id", Node::text("R1"))
            .with("version", Node::text("3"));
        if let Some(loc) = location {
            body.push_field("locationReference", loc);
        }
        body
    }

    #[test]
    fn linear_region_falls_back_to_to_point() {
        let linear = Object::new("TpegLinearLocation")
            .with("from", Node::Object(Object::new("TpegJunction")))
            .with("to", extended_point("Ávila"));
        let loc = Node::Object(
            Object::new("SingleRoadLinearLocation").with("tpegLinearLocation", Node::Object(linear)),
        );
        let rec = SituationRecord::from_object(record(Some(loc))).unwrap();
        assert_eq!(rec.region(), "Ávila");
        match &rec.location {
            Location::Linear(l) => assert_eq!(l.to.as_ref().and_then(|p| p.km), Some(12.5)),
            other => panic!("expected linear location, got {other:?}"),
        }
    }

    fn with_start(start: &str) -> SituationRecord {
        let spec = Object::new("OverallPeriod").with("overallStartTime", Node::text(start));
        let validity = Object::new("Validity").with("validityTimeSpecification", Node::Object(spec));
        let body = record(None).with("validity", Node::Object(validity));
        SituationRecord::from_object(body).unwrap()
    }

    #[test]
    fn start_without_offset_is_read_as_utc() {
        let rec = with_start("2099-01-01T00:00:00");
        assert_eq!(rec.validity_start, Some(time::macros::datetime!(2099-01-01 00:00 UTC)));

        let fractional = with_start("2099-01-01T06:30:00.250");
        assert_eq!(
            fractional.validity_start,
            Some(time::macros::datetime!(2099-01-01 06:30:00.250 UTC))
        );
    }

    #[test]
    fn start_with_offset_keeps_it() {
        let rec = with_start("2025-03-01T07:30:00+01:00");
        assert_eq!(rec.validity_start, Some(time::macros::datetime!(2025-03-01 07:30 +01:00)));
        assert_eq!(with_start("soon").validity_start, None);
    }

    #[test]
    fn missing_location_is_unknown_region() {
        let rec = SituationRecord::from_object(record(None)).unwrap();
        assert_eq!(rec.region(), UNKNOWN);
        assert_eq!(rec.event_type(), "MaintenanceWorks");
        assert_eq!(rec.key(), "R1:3");
    }

    #[test]
    fn record_without_version_is_rejected() {
        let body = Object::new("Accident").with("id", Node::text("X"));
        assert!(matches!(
            SituationRecord::from_object(body),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn generic_record_routes_by_cause() {
        let cause = Object::new("Cause")
            .with("causeType", Node::text("poorEnvironment"))
            .with(
                "detailedCauseType",
                Node::Object(
                    Object::new("DetailedCauseType")
                        .with("poorEnvironmentType", Node::List(vec![Node::text("fog"), Node::text("rain")]))
                        .with("detailedCauseTypeExtension", Node::text("skip")),
                ),
            );
        let body = Object::new(GENERIC_RECORD_TYPE)
            .with("id", Node::text("G"))
            .with("version", Node::Scalar(Scalar::Integer(1)))
            .with("cause", Node::Object(cause));
        let rec = SituationRecord::from_object(body).unwrap();
        assert_eq!(rec.event_type(), "poorEnvironment");
        assert_eq!(rec.known().event_type, "poor_environment");
        assert_eq!(
            rec.cause.as_ref().map(|c| c.subtypes.clone()),
            Some(vec!["fog".to_string(), "rain".to_string()])
        );
    }

    #[test]
    fn deletion_serializes_camel_case() {
        let deletion = Deletion {
            id: "A".into(),
            deleted_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&deletion).unwrap();
        assert_eq!(json, r#"{"id":"A","deletedAt":"1970-01-01T00:00:00Z"}"#);
    }
}
