//! Text reports.
//!
//! All functions here are pure: the same input always renders the same
//! text. Timestamps are passed in rather than read from the clock.

use chrono::NaiveDateTime;
use sprawl_analysis_models::{
    AnalysisRun, ChangeRecord, ClassBreakdown, ConservationPriority, LandCoverClass,
    SummaryMetrics, legend,
};

/// Delta magnitude separating "significant" from "moderate" trends.
pub const SIGNIFICANT_DELTA: f64 = 0.05;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Wording for one index trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trend {
    /// Short phrase, e.g. "significant vegetation decline".
    pub phrase: &'static str,
    /// One-sentence explanation.
    pub reason: &'static str,
}

/// Trend wording for a vegetation index delta.
#[must_use]
pub fn vegetation_trend(delta: Option<f64>) -> Trend {
    match delta {
        Some(d) if d > SIGNIFICANT_DELTA => Trend {
            phrase: "significant vegetation growth",
            reason: "This indicates improved environmental conditions, possibly due to reforestation, better land management, or natural recovery.",
        },
        Some(d) if d > 0.0 => Trend {
            phrase: "moderate vegetation growth",
            reason: "This suggests slight improvement in vegetation cover, possibly due to seasonal changes or minor land management improvements.",
        },
        Some(d) if d < -SIGNIFICANT_DELTA => Trend {
            phrase: "significant vegetation decline",
            reason: "This indicates environmental degradation, possibly due to deforestation, urban expansion, or climate change impacts.",
        },
        Some(d) if d < 0.0 => Trend {
            phrase: "moderate vegetation decline",
            reason: "This suggests slight reduction in vegetation cover, possibly due to seasonal changes or minor land use changes.",
        },
        _ => Trend {
            phrase: "stable vegetation conditions",
            reason: "Vegetation cover has remained relatively stable during the analysis period.",
        },
    }
}

/// Trend wording for a built-up index delta.
#[must_use]
pub fn urban_trend(delta: Option<f64>) -> Trend {
    match delta {
        Some(d) if d > SIGNIFICANT_DELTA => Trend {
            phrase: "significant urban expansion",
            reason: "This indicates substantial built-up area growth, likely due to urban development, infrastructure projects, or land use changes.",
        },
        Some(d) if d > 0.0 => Trend {
            phrase: "moderate urban expansion",
            reason: "This suggests some increase in built-up areas, possibly due to gradual urban development or infrastructure improvements.",
        },
        Some(d) if d < -SIGNIFICANT_DELTA => Trend {
            phrase: "significant urban decline",
            reason: "This indicates reduction in built-up areas, possibly due to demolition, land restoration, or natural disasters.",
        },
        Some(d) if d < 0.0 => Trend {
            phrase: "moderate urban decline",
            reason: "This suggests some reduction in built-up areas, possibly due to minor land use changes or seasonal variations.",
        },
        _ => Trend {
            phrase: "stable urban conditions",
            reason: "Built-up areas have remained relatively stable during the analysis period.",
        },
    }
}

/// `(problems, solutions)` paragraphs for a priority.
#[must_use]
pub const fn priority_guidance(priority: ConservationPriority) -> (&'static str, &'static str) {
    match priority {
        ConservationPriority::High => (
            "High conservation priority indicates significant environmental concerns, including potential habitat loss, biodiversity decline, and ecosystem degradation.",
            "Immediate conservation measures recommended: establish protected areas, implement sustainable land use policies, promote reforestation, and monitor environmental impacts.",
        ),
        ConservationPriority::Medium => (
            "Medium conservation priority suggests moderate environmental concerns that require attention to prevent further degradation.",
            "Recommended actions: implement sustainable development practices, establish monitoring programs, promote green infrastructure, and engage in community conservation efforts.",
        ),
        ConservationPriority::Low | ConservationPriority::Unknown => (
            "Low conservation priority indicates relatively stable environmental conditions, but continued monitoring is important.",
            "Maintain current environmental conditions through sustainable practices, regular monitoring, and community awareness programs.",
        ),
    }
}

/// A delta with an explicit sign and three decimals; `N/A` when missing.
#[must_use]
pub fn format_delta(delta: Option<f64>) -> String {
    delta.map_or_else(
        || "N/A".to_string(),
        |d| {
            let text = format!("{d:+.3}");
            if text == "-0.000" {
                "+0.000".to_string()
            } else {
                text
            }
        },
    )
}

fn direction(delta: Option<f64>) -> &'static str {
    match delta {
        Some(d) if d > 0.0 => "increase",
        Some(d) if d < 0.0 => "decrease",
        Some(_) => "no change",
        None => "no data",
    }
}

fn format_optional(value: Option<f64>, decimals: usize, suffix: &str) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.decimals$}{suffix}"))
}

fn fraction_line(label: &str, record: &ChangeRecord) -> String {
    format!(
        "  - {label}: {} -> {} ({})",
        format_optional(record.earlier, 3, ""),
        format_optional(record.later, 3, ""),
        format_delta(record.delta)
    )
}

/// Markdown summary of a run.
#[must_use]
pub fn summary_report(metrics: &SummaryMetrics) -> String {
    let vegetation = vegetation_trend(metrics.vegetation_delta);
    let urban = urban_trend(metrics.built_up_delta);
    let (problems, solutions) = priority_guidance(metrics.priority);
    let priority = metrics.priority;

    format!(
        "## Summary
Analysis of the selected area from {start} to {end} reveals {veg_trend} and {urban_trend}. The conservation priority for this area is classified as **{priority}**.

## Key Findings
- **Vegetation Change (NDVI):** {ndvi} ({ndvi_direction})
- **Urban Development (NDBI):** {ndbi} ({ndbi_direction})
- **Conservation Priority:** {priority}

## Reasons for Changes
**Vegetation:** {veg_reason}

**Urban Development:** {urban_reason}

## Problems Identified
{problems}

## Recommended Solutions
{solutions}

---
*This analysis was generated automatically based on satellite imagery and remote sensing data.*
",
        start = metrics.start,
        end = metrics.end,
        veg_trend = vegetation.phrase,
        urban_trend = urban.phrase,
        ndvi = format_delta(metrics.vegetation_delta),
        ndvi_direction = direction(metrics.vegetation_delta),
        ndbi = format_delta(metrics.built_up_delta),
        ndbi_direction = direction(metrics.built_up_delta),
        veg_reason = vegetation.reason,
        urban_reason = urban.reason,
    )
}

/// Formats a pixel count with thousands separators.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn group_thousands(count: f64) -> String {
    let digits = (count.round() as i64).unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if count.round() < 0.0 {
        grouped.insert(0, '-');
    }
    grouped
}

/// Plain-text land-cover classification report.
#[must_use]
pub fn classification_report(
    breakdown: &ClassBreakdown,
    area_name: &str,
    generated_at: NaiveDateTime,
) -> String {
    let mut lines = vec![
        "LAND COVER CLASSIFICATION REPORT".to_string(),
        "================================".to_string(),
        format!("Study Area: {area_name}"),
        format!("Analysis Date: {}", generated_at.format(TIMESTAMP_FORMAT)),
        String::new(),
        "CLASSIFICATION RESULTS:".to_string(),
    ];

    for stats in &breakdown.classes {
        lines.push(String::new());
        lines.push(format!("{}:", stats.class.as_ref().to_uppercase()));
        lines.push(format!("  - Area: {:.2} km²", stats.area_km2));
        lines.push(format!("  - Percentage: {:.1}%", stats.percentage));
        lines.push(format!("  - Pixel Count: {}", group_thousands(stats.pixel_count)));
    }

    let coverage = |class: LandCoverClass| breakdown.get(class).map_or(0.0, |s| s.percentage);
    let dominant = breakdown
        .dominant()
        .map_or_else(|| "none".to_string(), |class| class.to_string());

    lines.extend([
        String::new(),
        "SUMMARY:".to_string(),
        format!("  - Total Area: {:.2} km²", breakdown.total_area_km2()),
        format!("  - Dominant Class: {dominant}"),
        format!(
            "  - Vegetation Coverage: {:.1}%",
            coverage(LandCoverClass::Vegetation)
        ),
        format!(
            "  - Built-up Coverage: {:.1}%",
            coverage(LandCoverClass::BuiltUp)
        ),
    ]);

    lines.join("\n") + "\n"
}

/// Plain-text change report of a run.
#[must_use]
pub fn change_report(run: &AnalysisRun, area_name: &str, generated_at: NaiveDateTime) -> String {
    let vegetation = &run.vegetation_change;
    let urban = &run.urban_change;

    let mut lines = vec![
        "URBAN SPRAWL CHANGE ANALYSIS REPORT".to_string(),
        "===================================".to_string(),
        format!("Study Area: {area_name}"),
        format!("Time Period: {}", run.period),
        format!("Analysis Date: {}", generated_at.format(TIMESTAMP_FORMAT)),
        String::new(),
        "VEGETATION CHANGES:".to_string(),
        format!("  - Vegetation Loss: {:.2} km²", vegetation.loss_km2),
        format!("  - Vegetation Gain: {:.2} km²", vegetation.gain_km2),
        format!("  - Net Change: {:.2} km²", vegetation.net_change_km2),
        format!(
            "  - Change Percentage: {}",
            format_optional(vegetation.change_percentage, 1, "%")
        ),
        String::new(),
        "URBAN EXPANSION:".to_string(),
        format!("  - Urban Expansion: {:.2} km²", urban.gain_km2),
        format!("  - Urban Decline: {:.2} km²", urban.loss_km2),
        format!("  - Net Expansion: {:.2} km²", urban.net_change_km2),
        format!(
            "  - Expansion Rate: {}",
            format_optional(urban.gain_percentage, 1, "%")
        ),
        String::new(),
        "LAND COVER FRACTIONS:".to_string(),
        fraction_line("Vegetation Cover", &run.vegetation_fraction),
        fraction_line("Impervious Surface", &run.impervious_fraction),
    ];

    if let Some(matrix) = &run.change_matrix {
        lines.push(String::new());
        lines.push("LAND COVER TRANSITIONS:".to_string());
        for from in LandCoverClass::ALL {
            for to in LandCoverClass::ALL {
                let area = matrix.area(from, to);
                if from != to && area > 0.0 {
                    lines.push(format!("  - {} -> {}: {area:.2} km²", from.label(), to.label()));
                }
            }
        }
        lines.push(format!("  - Unchanged: {:.2} km²", matrix.unchanged()));

        lines.push(String::new());
        lines.push("NET CLASS CHANGE:".to_string());
        for class in LandCoverClass::ALL {
            let net = matrix.column_total(class) - matrix.row_total(class);
            lines.push(format!("  - {}: {net:+.2} km²", class.label()));
        }
    }

    if let Some(zones) = run.elevation_zones.as_deref().filter(|z| !z.is_empty()) {
        lines.push(String::new());
        lines.push("ELEVATION ZONES:".to_string());
        for zone in zones {
            lines.push(format!(
                "  - {}: mean NDVI change {}",
                zone.label,
                format_optional(zone.mean_change, 3, "")
            ));
        }
    }

    let driver = if urban.net_change_km2 > 0.0 {
        "Urban expansion"
    } else {
        "Vegetation loss"
    };
    let most_affected = run
        .elevation_zones
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|zone| zone.mean_change.map(|change| (zone, change)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or("Urban fringe areas", |(zone, _)| zone.label.as_str());

    lines.extend([
        String::new(),
        "KEY FINDINGS:".to_string(),
        format!("  - Primary driver of change: {driver}"),
        format!("  - Most affected areas: {most_affected}"),
        format!("  - Conservation priority: {}", run.priority),
    ]);

    lines.join("\n") + "\n"
}

/// The change report, followed by a classification report for each date
/// when the run was classified.
#[must_use]
pub fn detailed_report(run: &AnalysisRun, area_name: &str, generated_at: NaiveDateTime) -> String {
    let mut details = change_report(run, area_name, generated_at);

    if let Some(classification) = &run.classification {
        for (label, breakdown) in [
            ("start", &classification.earlier),
            ("end", &classification.later),
        ] {
            details.push('\n');
            details.push_str(&classification_report(
                breakdown,
                &format!("{area_name} ({label})"),
                generated_at,
            ));
        }
    }

    details
}

/// The Markdown summary of a run, with the detailed reports appended in a
/// fenced block when `details` is set.
#[must_use]
pub fn render_report(
    run: &AnalysisRun,
    area_name: &str,
    generated_at: NaiveDateTime,
    details: bool,
) -> String {
    let summary = summary_report(&run.summary_metrics());
    if !details {
        return summary;
    }
    format!(
        "{summary}\n## Details\n\n```text\n{}```\n",
        detailed_report(run, area_name, generated_at)
    )
}

/// The class legend as a Markdown table.
#[must_use]
pub fn legend_markdown() -> String {
    let mut lines = vec![
        "| Value | Class | Colour | Description |".to_string(),
        "|---|---|---|---|".to_string(),
    ];
    lines.extend(legend().into_iter().map(|entry| {
        format!(
            "| {} | {} | `{}` | {} |",
            entry.id,
            entry.class.label(),
            entry.color,
            entry.description
        )
    }));
    lines.join("\n") + "\n"
}
