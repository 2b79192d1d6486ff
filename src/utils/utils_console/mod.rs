use colored::{ColoredString, Colorize};

/// Prints the given string with the given color.
///
/// ## Example
/// ```
/// use switchopt::utils::utils_console::{switchopt_print, PrintMode, PrintColor};
/// switchopt_print("test", PrintMode::Print, PrintColor::Blue, false);
/// ```
pub fn switchopt_print(s: &str, mode: PrintMode, color: PrintColor, bolded: bool) {
    let string = color.paint(s, bolded);
    match mode {
        PrintMode::Println => { println!("{}", string); }
        PrintMode::Print => { print!("{}", string); }
    }
}

/// Println will cause a new line after each line, while Print will not.
#[derive(Clone, Debug)]
pub enum PrintMode {
    Println,
    Print
}

/// Defines color for a switchopt print command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrintColor {
    None,
    Blue,
    Green,
    Red,
    Yellow,
    Cyan,
    Magenta
}
impl PrintColor {
    pub fn get_color_triple(&self) -> (u8, u8, u8) {
        match self {
            PrintColor::None => { (0,0,0) }
            PrintColor::Blue => { return (0, 0, 255) }
            PrintColor::Green => { return (0, 255, 0) }
            PrintColor::Red => { return (255, 0, 0) }
            PrintColor::Yellow => { return (255, 255, 0) }
            PrintColor::Cyan => { return (0, 255, 255) }
            PrintColor::Magenta => { return (255, 0, 255) }
        }
    }
    fn paint(&self, s: &str, bolded: bool) -> ColoredString {
        let out = if self == &PrintColor::None {
            s.normal()
        } else {
            let c = self.get_color_triple();
            s.truecolor(c.0, c.1, c.2)
        };
        if bolded { out.bold() } else { out }
    }
}
