//! Hand-built HTML pages. Every interpolated string goes through [`escape`].

use std::fmt::Write;

use common::SensorView;

use crate::store::Reading;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What the dashboard shows below the device picker.
#[derive(Debug, PartialEq)]
pub enum Panel {
    Views(Vec<SensorView>),
    Banner(String),
}

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape(title)
    )
}

/// Store order is newest first; charts and tables read left to right in time.
pub fn chronological(mut newest_first: Vec<Reading>) -> Vec<Reading> {
    newest_first.reverse();
    newest_first
}

pub fn sensor_history(sensor_id: i32, newest_first: Vec<Reading>) -> String {
    let title = common::display_name(sensor_id);
    if newest_first.is_empty() {
        return page(
            &title,
            &format!(
                "<h1>{}</h1>\n<p class=\"empty\">No readings for sensor {sensor_id}.</p>\n",
                escape(&title)
            ),
        );
    }

    let readings = chronological(newest_first);
    let labels: Vec<String> = readings
        .iter()
        .map(|reading| reading.created_at.format(TIME_FORMAT).to_string())
        .collect();
    let values: Vec<f64> = readings.iter().map(|reading| reading.value).collect();

    let mut body = format!("<h1>{}</h1>\n<canvas id=\"chart\"></canvas>\n", escape(&title));
    body.push_str("<table>\n<tr><th>Time</th><th>Value</th></tr>\n");
    for (label, value) in labels.iter().zip(&values) {
        let _ = writeln!(body, "<tr><td>{}</td><td>{value}</td></tr>", escape(label));
    }
    body.push_str("</table>\n");

    let _ = write!(
        body,
        concat!(
            "<script src=\"https://cdn.jsdelivr.net/npm/chart.js\"></script>\n",
            "<script>\n",
            "new Chart(document.getElementById('chart'), {{type: 'line', data: {{labels: {}, ",
            "datasets: [{{label: {}, data: {}}}]}}}});\n",
            "</script>\n"
        ),
        to_js(&labels),
        to_js(&title),
        to_js(&values),
    );

    page(&title, &body)
}

fn to_js<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value)
        .map(|json| json.replace("</", "<\\/"))
        .unwrap_or_else(|_| "null".to_owned())
}

pub fn dashboard(selected: &str, panel: &Panel) -> String {
    let mut body = String::from("<h1>Sensor dashboard</h1>\n");
    let _ = writeln!(
        body,
        "<form method=\"get\" action=\"/dashboard\"><input name=\"device_id\" value=\"{}\"><button>Show</button></form>",
        escape(selected)
    );

    match panel {
        Panel::Banner(message) => {
            let _ = writeln!(body, "<div class=\"banner\">{}</div>", escape(message));
        }
        Panel::Views(views) => {
            for view in views {
                let _ = writeln!(
                    body,
                    concat!(
                        "<div class=\"sensor\" data-id=\"{}\"><h2>{}</h2>",
                        "<p>Value: {}</p><p>Humidity: {}</p><p>Voltage: {}</p>",
                        "<p>Updated: {}</p></div>"
                    ),
                    view.id,
                    escape(&view.name),
                    view.value,
                    view.humidity,
                    view.voltage,
                    view.timestamp.format(TIME_FORMAT),
                );
            }
        }
    }

    page("Sensor dashboard", &body)
}

pub fn error_page(message: &str) -> String {
    page(
        "Error",
        &format!("<div class=\"error\">{}</div>\n", escape(message)),
    )
}
