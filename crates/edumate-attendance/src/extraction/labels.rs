//! Label-driven metric lookup over the rendered attendance page.
//!
//! The charts render each percentage as SVG text inside a `div` that also
//! holds a `span` label. Containers are located by label text, then the
//! first `svg text` node inside is read.

use scraper::{ElementRef, Html, Selector};

use crate::types::MetricValue;

/// A metric label with the looser label tried when the first finds nothing.
#[derive(Debug, Clone, Copy)]
pub struct LabelSpec {
    pub primary: &'static str,
    pub fallback: &'static str,
}

pub const ATTENDANCE_LABEL: LabelSpec = LabelSpec {
    primary: "Attendance %",
    fallback: "Attendance",
};

pub const OD_LABEL: LabelSpec = LabelSpec {
    primary: "OD %",
    fallback: "OD",
};

/// Parse the page once and read both metrics.
///
/// The parsed document is not `Send`, so it never outlives this call.
pub fn read_metrics(html: &str) -> (MetricValue, MetricValue) {
    let document = Html::parse_document(html);
    (
        read_metric(&document, ATTENDANCE_LABEL),
        read_metric(&document, OD_LABEL),
    )
}

/// Look up a metric, retrying with the fallback label on a miss.
pub fn read_metric(document: &Html, spec: LabelSpec) -> MetricValue {
    let value = value_for_label(document, spec.primary);
    if value.is_available() {
        return value;
    }
    tracing::debug!(label = spec.primary, fallback = spec.fallback, "retrying with fallback label");
    value_for_label(document, spec.fallback)
}

/// Read the chart value associated with one exact label.
pub fn value_for_label(document: &Html, label: &str) -> MetricValue {
    let Some(container) = find_container(document, label) else {
        tracing::debug!(label, "no container for label");
        return MetricValue::NotAvailable;
    };
    match first_svg_text(container) {
        Some(text) => MetricValue::from_text(&text),
        None => {
            tracing::debug!(label, "container has no svg text");
            MetricValue::NotAvailable
        }
    }
}

/// Prefer the first `div` with the label as a direct child `span`;
/// otherwise the last `div` holding such a `span` anywhere below it, which
/// is the innermost match in document order.
fn find_container<'a>(document: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    let divs = move || {
        document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "div")
    };

    if let Some(direct) = divs().find(|div| {
        div.children()
            .filter_map(ElementRef::wrap)
            .any(|child| is_label_span(child, label))
    }) {
        return Some(direct);
    }

    divs()
        .filter(|div| {
            div.descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .any(|el| is_label_span(el, label))
        })
        .last()
}

fn is_label_span(el: ElementRef<'_>, label: &str) -> bool {
    el.value().name() == "span" && normalized_text(el) == label
}

fn normalized_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_svg_text(container: ElementRef<'_>) -> Option<String> {
    let selector = Selector::parse("svg text").ok()?;
    container
        .select(&selector)
        .next()
        .map(|text| text.text().collect::<String>())
}
