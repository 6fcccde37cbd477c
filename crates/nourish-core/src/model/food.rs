//! Food-name knowledge: normalization, allergen and diet matching, and
//! per-serving carbon estimates.

use nourish_db::models::DietType;

/// Lowercase, collapse whitespace, strip punctuation except hyphens.
pub fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn words(name: &str) -> Vec<String> {
    normalize(name)
        .split(|c: char| c == ' ' || c == '-')
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

fn word_matches(word: &str, term: &str) -> bool {
    word == term
        || word.strip_suffix('s') == Some(term)
        || word.strip_suffix("es") == Some(term)
        || term.strip_suffix('s') == Some(word)
}

/// Whether `term` (one or more words) appears in `item` as whole words.
/// Plural forms match either way, so "egg" matches "Boiled Eggs" but not
/// "eggplant".
pub fn mentions(item: &str, term: &str) -> bool {
    let item_words = words(item);
    let term_words = words(term);
    let Some((last, init)) = term_words.split_last() else {
        return false;
    };
    if term_words.len() > item_words.len() {
        return false;
    }
    item_words.windows(term_words.len()).any(|window| {
        window[..init.len()] == *init && word_matches(&window[init.len()], last)
    })
}

/// Ingredient words that a declared allergen or dislike also covers.
fn family(term: &str) -> &'static [&'static str] {
    match normalize(term).as_str() {
        "shellfish" | "seafood" => &[
            "shrimp", "prawn", "crab", "lobster", "clam", "mussel", "oyster", "scallop",
            "crayfish", "squid",
        ],
        "peanut" | "peanuts" | "groundnut" => &["peanut", "groundnut", "satay"],
        "tree nut" | "tree nuts" | "nuts" | "nut" => &[
            "almond", "cashew", "walnut", "pistachio", "hazelnut", "pecan", "macadamia",
        ],
        "dairy" | "milk" | "lactose" => &[
            "milk", "cheese", "paneer", "butter", "ghee", "yogurt", "yoghurt", "curd",
            "cream", "whey", "lassi", "raita",
        ],
        "egg" | "eggs" => &["egg", "omelette", "omelet", "mayonnaise", "frittata"],
        "gluten" | "wheat" => &[
            "wheat", "roti", "chapati", "bread", "pasta", "naan", "paratha", "semolina",
            "couscous", "noodle",
        ],
        "soy" | "soya" => &["soy", "soya", "tofu", "tempeh", "edamame"],
        "fish" => &[
            "fish", "salmon", "tuna", "cod", "sardine", "mackerel", "tilapia", "anchovy",
        ],
        "sesame" => &["sesame", "tahini"],
        _ => &[],
    }
}

/// Whether an item hits an allergen or dislike term, directly or through
/// the term's ingredient family.
pub fn conflicts_with(item: &str, term: &str) -> bool {
    mentions(item, term) || family(term).iter().any(|member| mentions(item, member))
}

/// The first term in `terms` that `item` conflicts with.
pub fn first_conflict<'a, I>(item: &str, terms: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    terms
        .into_iter()
        .find(|term| conflicts_with(item, term))
        .map(String::as_str)
}

const MEAT: &[&str] = &[
    "chicken", "mutton", "lamb", "beef", "pork", "bacon", "ham", "turkey", "goat", "keema",
    "sausage", "meat", "duck",
];
const DAIRY_AND_HONEY: &[&str] = &[
    "milk", "cheese", "paneer", "butter", "ghee", "yogurt", "yoghurt", "curd", "cream",
    "whey", "lassi", "raita", "honey",
];

/// The reason an item is off-limits for a diet type, if it is.
pub fn diet_violation(item: &str, diet: DietType) -> Option<&'static str> {
    if diet == DietType::Omnivore {
        return None;
    }
    if MEAT.iter().any(|m| mentions(item, m)) {
        return Some("meat");
    }
    if conflicts_with(item, "fish") || conflicts_with(item, "shellfish") {
        return Some("fish or seafood");
    }
    match diet {
        DietType::Vegetarian if conflicts_with(item, "egg") => Some("egg"),
        DietType::Vegan if conflicts_with(item, "egg") => Some("egg"),
        DietType::Vegan if DAIRY_AND_HONEY.iter().any(|d| mentions(item, d)) => {
            Some("dairy or honey")
        }
        _ => None,
    }
}

/// Rough kg CO2e for one serving of an item, keyed on its main ingredient.
pub fn serving_co2_kg(item: &str) -> f64 {
    const TABLE: &[(&[&str], f64)] = &[
        (&["mutton", "lamb", "beef", "goat"], 2.5),
        (&["chicken", "turkey", "pork"], 0.8),
        (&["paneer", "cheese", "butter", "ghee"], 0.6),
        (&["fish", "salmon", "tuna", "prawn", "shrimp"], 0.5),
        (&["egg", "omelette"], 0.4),
        (&["dal", "lentil", "bean", "chickpea", "chana", "rajma"], 0.2),
        (&["vegetable", "sabzi", "salad", "spinach", "cucumber"], 0.15),
        (&["rice", "roti", "chapati", "oats", "poha"], 0.25),
    ];
    TABLE
        .iter()
        .find(|(keys, _)| keys.iter().any(|k| mentions(item, k)))
        .map(|(_, kg)| *kg)
        .unwrap_or(0.35)
}
