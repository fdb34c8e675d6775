//! Operator-facing strings in the languages we ship.

/// Look up `key` for `locale` ("fr", "fr-FR", "en-GB" ...), falling back to English.
pub fn get(locale: &str, key: &str) -> &'static str {
    let lang = locale
        .split(['-', '_'])
        .next()
        .unwrap_or("en")
        .to_ascii_lowercase();

    match (lang.as_str(), key) {
        ("fr", "changessaved") => "Modifications enregistrées",
        ("fr", "hostexists") => "Un hôte existe déjà avec ce wwwroot",
        ("fr", "invalidurl") => "Le paramètre URL est invalide",
        ("fr", "invalidpubkey") => "La clé publique n'est pas valide",
        ("fr", "invalidapplication") => "Application inconnue",
        ("fr", "unknownhost") => "Hôte inconnu",
        ("fr", "nopermissions") => "Vous n'avez pas la permission de faire cela",
        ("fr", "invalidsesskey") => "Clé de session invalide",
        ("fr", "nocurl") => "Le client HTTP n'est pas disponible",
        ("fr", "xmlrpc-missing") => "Le support XML-RPC n'est pas disponible",
        ("fr", "networkerror") => "L'hôte distant est injoignable",
        ("fr", "invalidaction") => "Action invalide",
        (_, key) => english(key),
    }
}

fn english(key: &str) -> &'static str {
    match key {
        "changessaved" => "Changes saved",
        "hostexists" => "A host already exists with that wwwroot",
        "invalidurl" => "Invalid URL parameter",
        "invalidpubkey" => "The public key is not valid",
        "invalidapplication" => "Unknown application",
        "unknownhost" => "Unknown host",
        "nopermissions" => "Sorry, but you do not currently have permissions to do that",
        "invalidsesskey" => "Incorrect session key",
        "nocurl" => "The HTTP client is not available",
        "xmlrpc-missing" => "XML-RPC support is not available",
        "requiresopenssl" => "Networking requires certificate support",
        "networkerror" => "The remote host could not be reached",
        "invalidaction" => "Invalid action parameter",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_english() {
        assert_eq!(get("fr-FR", "changessaved"), "Modifications enregistrées");
        assert_eq!(get("de", "changessaved"), "Changes saved");
        assert_eq!(get("fr", "requiresopenssl"), "Networking requires certificate support");
    }
}
