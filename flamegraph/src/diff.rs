use crate::Frame;

/// Computes the difference between two snapshots.
///
/// Every node in the result carries `head.value - base.value`, recursing over
/// the union of child names; a side missing a node is treated as zero-valued.
/// Subtrees where nothing changed are pruned, so `diff(a, a)` is `None`.
/// Zero-valued nodes survive only while they still have changed descendants.
pub fn diff(head: Option<&Frame>, base: Option<&Frame>) -> Option<Frame> {
    let name = match (head, base) {
        (Some(h), _) => h.name.clone(),
        (None, Some(b)) => b.name.clone(),
        (None, None) => return None,
    };

    let head_value = head.map(|f| f.value).unwrap_or(0);
    let base_value = base.map(|f| f.value).unwrap_or(0);

    let mut children = Vec::new();
    let empty = [];
    let head_children = head.map(|f| f.children.as_slice()).unwrap_or(&empty);
    let base_children = base.map(|f| f.children.as_slice()).unwrap_or(&empty);

    for hc in head_children {
        let bc = base_children.iter().find(|c| c.name == hc.name);
        if let Some(child) = diff(Some(hc), bc) {
            children.push(child);
        }
    }
    for bc in base_children {
        if head_children.iter().any(|c| c.name == bc.name) {
            continue;
        }
        if let Some(child) = diff(None, Some(bc)) {
            children.push(child);
        }
    }
    children.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));

    let value = head_value - base_value;
    if value == 0 && children.is_empty() {
        return None;
    }
    Some(Frame {
        name,
        value,
        children,
    })
}
