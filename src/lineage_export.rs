use crate::composition::CompositionDetail;
use crate::state::LabState;
use std::collections::HashMap;
use svg::node::element::{Circle, Line, Polygon, Rectangle, Text};
use svg::Document;

const W: f32 = 1600.0;
const H: f32 = 900.0;

fn numeric_suffix(id: &str) -> u64 {
    id.rsplit('-')
        .next()
        .and_then(|tail| tail.parse().ok())
        .unwrap_or(0)
}

fn display_name(detail: &CompositionDetail) -> String {
    match detail {
        CompositionDetail::Sample { content } => content.clone(),
        CompositionDetail::Gdna { .. } => "gdna".to_string(),
        CompositionDetail::Library { .. } => "library".to_string(),
        CompositionDetail::Primer { .. } => "primer".to_string(),
        CompositionDetail::Reagent {
            reagent_type,
            external_lot_id,
        } => format!("{reagent_type} ({external_lot_id})"),
        CompositionDetail::Pool { name } => name.clone(),
    }
}

/// Renders the composition lineage as an SVG: one node per composition,
/// one edge per upstream reference and per pool component, edges labelled
/// with the deriving process. Pools aggregating more than one input are
/// drawn as n-ary diamond nodes.
pub fn export_lineage_svg(state: &LabState) -> String {
    let mut rows: Vec<(String, String, String, f64)> = state
        .compositions
        .values()
        .map(|composition| {
            (
                composition.id.clone(),
                display_name(&composition.detail),
                composition.created_by.clone(),
                composition.volume,
            )
        })
        .collect();
    rows.sort_by(|a, b| numeric_suffix(&a.0).cmp(&numeric_suffix(&b.0)).then(a.0.cmp(&b.0)));

    let mut pool_sizes: HashMap<String, usize> = HashMap::new();
    for component in &state.pool_components {
        *pool_sizes.entry(component.pool.clone()).or_insert(0) += 1;
    }

    let mut pos_by_comp: HashMap<String, (f32, f32)> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        use std::hash::{Hash, Hasher};
        row.0.hash(&mut h);
        let lane = (h.finish() % 5) as f32;
        let x = 110.0 + idx as f32 * 170.0;
        let y = 120.0 + lane * 130.0;
        pos_by_comp.insert(row.0.clone(), (x, y));
    }

    let mut doc = Document::new()
        .set("viewBox", (0, 0, W, H))
        .set("width", W)
        .set("height", H)
        .set("style", "background:#ffffff");

    doc = doc.add(
        Text::new("plateflow lineage")
            .set("x", 24)
            .set("y", 34)
            .set("font-family", "Helvetica, Arial, sans-serif")
            .set("font-size", 24)
            .set("fill", "#202020"),
    );

    // Derivation edges plus pool recipe edges, labelled by process.
    let mut edges: Vec<(String, String, String)> = vec![];
    for composition in state.compositions.values() {
        for upstream in composition.upstream_compositions() {
            edges.push((
                upstream.clone(),
                composition.id.clone(),
                composition.created_by.clone(),
            ));
        }
    }
    for component in &state.pool_components {
        let process = state
            .compositions
            .get(&component.pool)
            .map(|pool| pool.created_by.clone())
            .unwrap_or_default();
        edges.push((component.input.clone(), component.pool.clone(), process));
    }

    for (from, to, process) in &edges {
        let Some((fx, fy)) = pos_by_comp.get(from).cloned() else {
            continue;
        };
        let Some((tx, ty)) = pos_by_comp.get(to).cloned() else {
            continue;
        };
        doc = doc.add(
            Line::new()
                .set("x1", fx)
                .set("y1", fy)
                .set("x2", tx)
                .set("y2", ty)
                .set("stroke", "#8a8a8a")
                .set("stroke-width", 1.2),
        );
        let mx = (fx + tx) * 0.5;
        let my = (fy + ty) * 0.5 - 6.0;
        doc = doc
            .add(
                Rectangle::new()
                    .set("x", mx - 52.0)
                    .set("y", my - 12.0)
                    .set("width", 104)
                    .set("height", 16)
                    .set("fill", "#f5f5f5")
                    .set("stroke", "#e0e0e0")
                    .set("rx", 2),
            )
            .add(
                Text::new(process.clone())
                    .set("x", mx)
                    .set("y", my)
                    .set("text-anchor", "middle")
                    .set("dominant-baseline", "middle")
                    .set("font-family", "Helvetica, Arial, sans-serif")
                    .set("font-size", 10)
                    .set("fill", "#222222"),
            );
    }

    for row in &rows {
        let Some((x, y)) = pos_by_comp.get(&row.0).cloned() else {
            continue;
        };
        let pool_size = pool_sizes.get(&row.0).cloned().unwrap_or(0);
        if pool_size > 1 {
            let points = format!(
                "{},{} {},{} {},{} {},{}",
                x,
                y - 18.0,
                x + 18.0,
                y,
                x,
                y + 18.0,
                x - 18.0,
                y
            );
            doc = doc
                .add(
                    Polygon::new()
                        .set("points", points)
                        .set("fill", "#b47846")
                        .set("stroke", "#a05f2b")
                        .set("stroke-width", 1),
                )
                .add(
                    Text::new(format!("n={pool_size}"))
                        .set("x", x + 22.0)
                        .set("y", y - 12.0)
                        .set("font-family", "Helvetica, Arial, sans-serif")
                        .set("font-size", 10)
                        .set("fill", "#5c4300"),
                );
        } else {
            doc = doc.add(
                Circle::new()
                    .set("cx", x)
                    .set("cy", y)
                    .set("r", 16)
                    .set("fill", "#5a8cd2")
                    .set("stroke", "#3b6aaa")
                    .set("stroke-width", 1),
            );
        }

        doc = doc
            .add(
                Text::new(row.1.clone())
                    .set("x", x + 24.0)
                    .set("y", y - 2.0)
                    .set("font-family", "Helvetica, Arial, sans-serif")
                    .set("font-size", 12)
                    .set("fill", "#101010"),
            )
            .add(
                Text::new(format!("{} ({} uL)", row.0, row.3))
                    .set("x", x + 24.0)
                    .set("y", y + 12.0)
                    .set("font-family", "Helvetica, Arial, sans-serif")
                    .set("font-size", 10)
                    .set("fill", "#222222"),
            );
    }

    doc.to_string()
}
