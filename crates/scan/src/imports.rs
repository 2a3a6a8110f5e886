use crate::scanner::{Leaf, LeafTree};
use crate::stdlib::is_stdlib;
use std::collections::BTreeSet;

/// IPython extensions that ship with IPython itself
const BUILT_IN_EXTENSIONS: &[&str] = &["autoreload", "storemagic"];

/// Modules published under a different package name
const PACKAGE_ALIASES: &[(&str, &str)] = &[("sklearn", "scikit-learn"), ("sql", "jupysql")];

/// Map a module or extension name to the package that provides it
pub fn package_name(module: &str) -> &str {
    PACKAGE_ALIASES
        .iter()
        .find(|(from, _)| *from == module)
        .map(|(_, to)| *to)
        .unwrap_or(module)
}

/// Third-party packages used by the code in `tree`: imported modules that are
/// not in the standard library, plus `%load_ext` extensions. Sorted, no
/// duplicates.
pub fn packages_used(tree: &LeafTree) -> Vec<String> {
    let mut found = BTreeSet::new();

    let mut cursor = tree.first_leaf();
    while let Some(leaf) = cursor {
        cursor = if leaf.is("import") && !in_from_import(tree, leaf) {
            let (roots, rest) = read_import_list(leaf.next());
            for root in roots {
                if !is_stdlib(root) {
                    found.insert(package_name(root).to_string());
                }
            }
            rest
        } else if leaf.is("from") {
            match read_from_import(leaf) {
                Some((module, after_import)) => {
                    if let Some(root) = module.filter(|root| !is_stdlib(root)) {
                        found.insert(package_name(root).to_string());
                    }
                    after_import
                }
                None => leaf.next(),
            }
        } else if leaf.is("%") {
            if let Some(ext) = read_load_ext(leaf) {
                if !BUILT_IN_EXTENSIONS.contains(&ext) {
                    found.insert(package_name(ext).to_string());
                }
            }
            leaf.next()
        } else {
            leaf.next()
        };
    }

    found.into_iter().collect()
}

/// True when an `import` keyword belongs to a `from ... import` statement.
/// Those are read from their `from` keyword, so the names after `import`
/// are never modules.
fn in_from_import(tree: &LeafTree, import_kw: Leaf<'_>) -> bool {
    matches!(
        import_kw.parent().and_then(|parent| tree.node_kind(parent)),
        Some("import_from_statement" | "future_import_statement")
    )
}

/// Reads `a.b as x, c` and returns the root names plus the leaf after the list.
fn read_import_list(start: Option<Leaf<'_>>) -> (Vec<&str>, Option<Leaf<'_>>) {
    let mut roots = Vec::new();
    let mut cursor = start;

    while let Some(leaf) = cursor {
        if !leaf.is_name() {
            break;
        }
        roots.push(leaf.value());

        let mut next = skip_dotted_tail(leaf);
        if let Some(as_kw) = next.filter(|l| l.is("as")) {
            next = as_kw.next().filter(|l| l.is_name()).and_then(|l| l.next());
        }

        match next {
            Some(comma) if comma.is(",") => cursor = comma.next(),
            other => return (roots, other),
        }
    }

    (roots, cursor)
}

/// Reads `a.b import` after a `from` keyword and returns the root module
/// (None for relative imports) plus the leaf after `import`. A `from` used
/// outside an import (`yield from`, `raise ... from`) gives None.
fn read_from_import<'t>(
    from_kw: Leaf<'t>,
) -> Option<(Option<&'t str>, Option<Leaf<'t>>)> {
    let mut cursor = from_kw.next();
    let mut relative = false;
    while let Some(dot) = cursor.filter(|l| l.is(".") || l.is("...")) {
        relative = true;
        cursor = dot.next();
    }

    let module = cursor?;
    // `__future__` is a keyword token in the grammar
    if module.value() == "__future__" {
        return Some((None, module.next().filter(|l| l.is("import"))?.next()));
    }
    let import_kw = if module.is_name() {
        skip_dotted_tail(module)?
    } else if relative {
        module
    } else {
        return None;
    };

    // the module path and `import` must share the statement's line
    if !import_kw.is("import") || !from_kw.on_same_line(&import_kw) {
        return None;
    }

    let root = (!relative && module.is_name()).then(|| module.value());
    Some((root, import_kw.next()))
}

/// Skips `.name` pairs following `leaf`, returning the first leaf after them.
fn skip_dotted_tail(leaf: Leaf<'_>) -> Option<Leaf<'_>> {
    let mut last = leaf;
    loop {
        match (last.next(), last.step_forward(2)) {
            (Some(dot), Some(name)) if dot.is(".") && name.is_name() => last = name,
            _ => return last.next(),
        }
    }
}

/// `% load_ext <name>` (or `reload_ext`) starting at the `%` leaf.
fn read_load_ext(percent: Leaf<'_>) -> Option<&str> {
    let magic = percent.next().filter(|l| l.is_name())?;
    if !matches!(magic.value(), "load_ext" | "reload_ext") {
        return None;
    }
    percent
        .step_forward(2)
        .filter(|l| l.is_name())
        .map(|l| l.value())
}
