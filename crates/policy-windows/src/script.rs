//! PowerShell script builders for the registry primitives.
//!
//! Every path and value name is passed as a single-quoted literal; single
//! quotes inside are doubled, which is the only escape PowerShell honours
//! inside such literals.

use policy_api::PolicyValue;

const PRELUDE: &str = "$ErrorActionPreference = 'Stop'; $ProgressPreference = 'SilentlyContinue'; ";

pub fn quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

pub fn ensure_key(path: &str) -> String {
    format!(
        "{PRELUDE}$p = {}; if (-not (Test-Path -LiteralPath $p)) {{ New-Item -Path $p -Force | Out-Null }}",
        quote(path)
    )
}

pub fn set_value(path: &str, name: &str, value: &PolicyValue) -> String {
    let (literal, kind) = match value {
        PolicyValue::Dword(v) => (v.to_string(), "DWord"),
        PolicyValue::String(v) => (quote(v), "String"),
    };
    format!(
        "{PRELUDE}New-ItemProperty -LiteralPath {} -Name {} -Value {} -PropertyType {} -Force | Out-Null",
        quote(path),
        quote(name),
        literal,
        kind
    )
}

/// Prints the value as compact JSON, or `null` when the key or value is absent.
pub fn get_value(path: &str, name: &str) -> String {
    format!(
        "{PRELUDE}$p = {}; if (Test-Path -LiteralPath $p) {{ $v = (Get-ItemProperty -LiteralPath $p -ErrorAction SilentlyContinue).{}; if ($null -ne $v) {{ ConvertTo-Json -Compress -InputObject $v }} else {{ 'null' }} }} else {{ 'null' }}",
        quote(path),
        quote(name)
    )
}

/// Prints every value under the key as a compact JSON object (`{}` when absent).
pub fn list_values(path: &str) -> String {
    format!(
        "{PRELUDE}$p = {}; if (Test-Path -LiteralPath $p) {{ $k = Get-Item -LiteralPath $p; $o = [ordered]@{{}}; foreach ($n in $k.GetValueNames()) {{ $o[$n] = $k.GetValue($n) }}; ConvertTo-Json -Compress -InputObject $o }} else {{ '{{}}' }}",
        quote(path)
    )
}

pub fn delete_key(path: &str) -> String {
    format!(
        "{PRELUDE}$p = {}; if (Test-Path -LiteralPath $p) {{ Remove-Item -LiteralPath $p -Recurse -Force }}",
        quote(path)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_doubles_embedded_quotes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), "'it''s'");
        assert_eq!(quote("'; Remove-Item C:\\ #"), "'''; Remove-Item C:\\ #'");
    }

    #[test]
    fn ensure_key_is_guarded_by_test_path() {
        let script = ensure_key(r"HKLM:\SOFTWARE\Policies\Google\Chrome\URLBlocklist");
        assert!(script.starts_with("$ErrorActionPreference = 'Stop'"));
        assert!(script.contains(r"$p = 'HKLM:\SOFTWARE\Policies\Google\Chrome\URLBlocklist'"));
        assert!(script.contains("if (-not (Test-Path -LiteralPath $p))"));
        assert!(script.contains("New-Item -Path $p -Force"));
    }

    #[test]
    fn set_value_picks_property_type() {
        let dword = set_value(r"HKLM:\X", "WriteProtect", &PolicyValue::Dword(1));
        assert!(dword.contains("-Name 'WriteProtect' -Value 1 -PropertyType DWord -Force"));

        let string = set_value(r"HKLM:\X", "1", &PolicyValue::String("example.com".into()));
        assert!(string.contains("-Name '1' -Value 'example.com' -PropertyType String -Force"));
    }

    #[test]
    fn read_scripts_fall_back_to_empty_json() {
        assert!(get_value(r"HKLM:\X", "WriteProtect").ends_with("else { 'null' }"));
        assert!(get_value(r"HKLM:\X", "WriteProtect").contains(".'WriteProtect'"));
        assert!(list_values(r"HKLM:\X").ends_with("else { '{}' }"));
        assert!(list_values(r"HKLM:\X").contains("[ordered]@{}"));
    }

    #[test]
    fn delete_key_is_a_no_op_when_absent() {
        let script = delete_key(r"HKLM:\X\URLAllowlist");
        assert!(script.contains(
            "if (Test-Path -LiteralPath $p) { Remove-Item -LiteralPath $p -Recurse -Force }"
        ));
    }
}
