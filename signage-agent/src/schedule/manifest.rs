//! Schedule manifest parsing
//!
//! ```xml
//! <schedule>
//!   <default file="1"/>
//!   <layout file="10" scheduleid="5" priority="1" fromdt="2026-01-01 00:00:00"
//!           todt="2027-01-01 00:00:00" dependents="font.ttf,logo.png"/>
//!   <layout file="12" scheduleid="6" shareOfVoice="600"/>
//!   <campaign id="3" scheduleid="7" priority="0" cyclePlayback="1" groupKey="c3" playCount="2">
//!     <layout file="20"/>
//!     <layout file="21"/>
//!   </campaign>
//!   <overlays><overlay file="30" scheduleid="8"/></overlays>
//!   <command code="reboot" date="2026-01-01 03:00:00" scheduleid="9"/>
//!   <dependants><file>bundle.min.js</file></dependants>
//! </schedule>
//! ```

use chrono::NaiveDateTime;
use roxmltree::{Document, Node};
use tracing::warn;

use super::geo::GeoFence;
use super::item::ScheduleItem;
use crate::error::{Error, Result};

pub const SCHEDULE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Command entry fired once when its date comes due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleCommand {
    pub code: String,
    pub schedule_id: i64,
    pub date: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleManifest {
    pub default_layout: Option<i64>,
    /// Normal and interrupt items, in manifest order
    pub layouts: Vec<ScheduleItem>,
    pub overlays: Vec<ScheduleItem>,
    pub commands: Vec<ScheduleCommand>,
    /// Files every layout depends on
    pub global_dependents: Vec<String>,
}

impl ScheduleManifest {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml).map_err(|e| Error::InvalidManifest(e.to_string()))?;
        let root = doc.root_element();
        if root.tag_name().name() != "schedule" {
            return Err(Error::InvalidManifest(format!(
                "expected <schedule>, found <{}>",
                root.tag_name().name()
            )));
        }

        let mut manifest = ScheduleManifest::default();

        for node in root.children().filter(Node::is_element) {
            match node.tag_name().name() {
                "default" => {
                    manifest.default_layout = node.attribute("file").and_then(|f| f.parse().ok());
                }
                "layout" => match parse_item(&node, None) {
                    Ok(item) => manifest.layouts.push(item),
                    Err(e) => warn!(error = %e, "Skipping malformed schedule layout"),
                },
                "campaign" => {
                    for child in node.children().filter(|n| n.has_tag_name("layout")) {
                        match parse_item(&child, Some(&node)) {
                            Ok(item) => manifest.layouts.push(item),
                            Err(e) => warn!(error = %e, "Skipping malformed campaign layout"),
                        }
                    }
                }
                "overlays" => {
                    for child in node.children().filter(|n| n.has_tag_name("overlay")) {
                        match parse_item(&child, None) {
                            Ok(item) => manifest.overlays.push(item),
                            Err(e) => warn!(error = %e, "Skipping malformed overlay"),
                        }
                    }
                }
                "command" => match parse_command(&node) {
                    Ok(command) => manifest.commands.push(command),
                    Err(e) => warn!(error = %e, "Skipping malformed command"),
                },
                "dependants" => {
                    manifest.global_dependents.extend(
                        node.children()
                            .filter(|n| n.has_tag_name("file"))
                            .filter_map(|n| n.text())
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(str::to_string),
                    );
                }
                other => warn!(element = %other, "Ignoring unknown schedule element"),
            }
        }

        Ok(manifest)
    }
}

/// Attribute from the item, falling back to its enclosing campaign
fn attr<'a>(node: &Node<'a, '_>, campaign: Option<&Node<'a, '_>>, name: &str) -> Option<&'a str> {
    node.attribute(name)
        .or_else(|| campaign.and_then(|c| c.attribute(name)))
}

fn parse_item(node: &Node, campaign: Option<&Node>) -> Result<ScheduleItem> {
    let file = node
        .attribute("file")
        .ok_or_else(|| Error::InvalidManifest("layout without file".to_string()))?;
    let id = file
        .parse::<i64>()
        .map_err(|e| Error::InvalidManifest(format!("layout file '{}': {}", file, e)))?;
    let schedule_id = attr(node, campaign, "scheduleid")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut item = ScheduleItem::new(id, schedule_id);

    if let Some(from) = attr(node, campaign, "fromdt") {
        item.from_dt = parse_date(from)?;
    }
    if let Some(to) = attr(node, campaign, "todt") {
        item.to_dt = parse_date(to)?;
    }
    item.priority = attr(node, campaign, "priority")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    item.is_override = flag(attr(node, campaign, "isOverride"));
    item.share_of_voice = attr(node, campaign, "shareOfVoice")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    item.dependents = node
        .attribute("dependents")
        .map(|d| {
            d.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    item.is_geo_aware = flag(attr(node, campaign, "isGeoAware"));
    if item.is_geo_aware {
        item.geo_fence = attr(node, campaign, "geoLocation").and_then(GeoFence::parse);
        if item.geo_fence.is_none() {
            warn!(layout_id = id, "Geo-aware item has no usable geoLocation");
        }
    }

    if flag(attr(node, campaign, "cyclePlayback")) {
        item.cycle_group_key = attr(node, campaign, "groupKey")
            .map(str::to_string)
            .or_else(|| campaign.and_then(|c| c.attribute("id")).map(|id| format!("campaign-{}", id)));
        item.cycle_play_count = attr(node, campaign, "playCount")
            .and_then(|v| v.parse().ok())
            .filter(|c| *c > 0)
            .unwrap_or(1);
    }

    Ok(item)
}

fn parse_command(node: &Node) -> Result<ScheduleCommand> {
    let code = node
        .attribute("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::InvalidManifest("command without code".to_string()))?;
    let date = node
        .attribute("date")
        .ok_or_else(|| Error::InvalidManifest(format!("command {} without date", code)))?;
    Ok(ScheduleCommand {
        code: code.to_string(),
        schedule_id: node
            .attribute("scheduleid")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        date: parse_date(date)?,
    })
}

fn parse_date(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), SCHEDULE_DATE_FORMAT)
        .map_err(|e| Error::InvalidManifest(format!("date '{}': {}", value, e)))
}

fn flag(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<schedule>
  <default file="1"/>
  <layout file="10" scheduleid="5" priority="1" fromdt="2026-01-01 00:00:00"
          todt="2027-01-01 00:00:00" dependents="font.ttf, logo.png"/>
  <layout file="12" scheduleid="6" shareOfVoice="600"/>
  <layout file="bogus" scheduleid="99"/>
  <campaign id="3" scheduleid="7" priority="2" cyclePlayback="1" playCount="2">
    <layout file="20"/>
    <layout file="21"/>
  </campaign>
  <overlays><overlay file="30" scheduleid="8"/></overlays>
  <command code="reboot" date="2026-01-01 03:00:00" scheduleid="9"/>
  <dependants><file>bundle.min.js</file><file> </file></dependants>
</schedule>"#;

    #[test]
    fn test_parse_sample() {
        let manifest = ScheduleManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.default_layout, Some(1));
        assert_eq!(manifest.layouts.len(), 4);

        let first = &manifest.layouts[0];
        assert_eq!(first.id, 10);
        assert_eq!(first.priority, 1);
        assert_eq!(first.dependents, vec!["font.ttf", "logo.png"]);
        assert_eq!(
            first.to_dt,
            NaiveDateTime::parse_from_str("2027-01-01 00:00:00", SCHEDULE_DATE_FORMAT).unwrap()
        );

        assert!(manifest.layouts[1].is_interrupt());

        let campaign: Vec<_> = manifest.layouts[2..].iter().collect();
        assert!(campaign.iter().all(|i| i.schedule_id == 7 && i.priority == 2));
        assert!(campaign
            .iter()
            .all(|i| i.cycle_group_key.as_deref() == Some("campaign-3")));
        assert_eq!(campaign[0].cycle_play_count, 2);

        assert_eq!(manifest.overlays.len(), 1);
        assert_eq!(manifest.commands[0].code, "reboot");
        assert_eq!(manifest.global_dependents, vec!["bundle.min.js"]);
    }

    #[test]
    fn test_wrong_root_rejected() {
        assert!(matches!(
            ScheduleManifest::parse("<files/>"),
            Err(Error::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_bad_date_skips_item() {
        let xml = r#"<schedule><layout file="1" fromdt="yesterday"/><layout file="2"/></schedule>"#;
        let manifest = ScheduleManifest::parse(xml).unwrap();
        assert_eq!(manifest.layouts.len(), 1);
        assert_eq!(manifest.layouts[0].id, 2);
    }
}
