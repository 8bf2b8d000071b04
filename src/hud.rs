use crate::frame::{Frame, Rgba};

pub const GLYPH_WIDTH: usize = 3;
pub const GLYPH_HEIGHT: usize = 5;
pub const GLYPH_SPACING: usize = 1;
pub const LINE_SPACING: usize = 2;

/// Draws `text` with its top-left corner at `(x, y)`, each glyph pixel
/// expanded to a `scale` x `scale` block. Lowercase is drawn as uppercase.
pub fn overlay_text(frame: &mut Frame, x: usize, y: usize, text: &str, color: Rgba, scale: usize) {
    let scale = scale.max(1);
    let advance = (GLYPH_WIDTH + GLYPH_SPACING) * scale;
    let mut cursor_x = x;
    for ch in text.chars() {
        if cursor_x >= frame.width() {
            break;
        }
        draw_glyph(frame, cursor_x, y, ch.to_ascii_uppercase(), color, scale);
        cursor_x = cursor_x.saturating_add(advance);
    }
}

/// Stacks lines downward from `(x, y)`.
pub fn overlay_lines<S: AsRef<str>>(
    frame: &mut Frame,
    x: usize,
    y: usize,
    lines: &[S],
    color: Rgba,
    scale: usize,
) {
    let scale = scale.max(1);
    let line_height = (GLYPH_HEIGHT + LINE_SPACING) * scale;
    for (i, line) in lines.iter().enumerate() {
        overlay_text(frame, x, y + i * line_height, line.as_ref(), color, scale);
    }
}

fn draw_glyph(frame: &mut Frame, x: usize, y: usize, ch: char, color: Rgba, scale: usize) {
    let (width, height) = frame.size();
    let rows = glyph_rows(ch);
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let tx = x + col * scale + sx;
                    let ty = y + row * scale + sy;
                    if tx >= width || ty >= height {
                        continue;
                    }
                    let under = frame.get(tx, ty);
                    let a = color[3].clamp(0.0, 1.0);
                    frame.set(
                        tx,
                        ty,
                        [
                            color[0] * a + under[0] * (1.0 - a),
                            color[1] * a + under[1] * (1.0 - a),
                            color[2] * a + under[2] * (1.0 - a),
                            under[3],
                        ],
                    );
                }
            }
        }
    }
}

fn glyph_rows(ch: char) -> [u8; GLYPH_HEIGHT] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b111, 0b100, 0b101, 0b101, 0b111],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b111, 0b100, 0b111, 0b001, 0b111],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '=' => [0b000, 0b111, 0b000, 0b111, 0b000],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => [0b000, 0b000, 0b000, 0b000, 0b000],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BLACK;

    const WHITE: Rgba = [1.0, 1.0, 1.0, 1.0];

    #[test]
    fn overlay_text_sets_expected_pixels() {
        let mut frame = Frame::new(8, 8, BLACK);
        overlay_text(&mut frame, 1, 1, "0", WHITE, 1);
        assert_eq!(frame.get(1, 1), WHITE);
        assert_eq!(frame.get(3, 1), WHITE);
        assert_eq!(frame.get(2, 2), BLACK);
    }

    #[test]
    fn lowercase_and_scale_match_uppercase_blocks() {
        let mut upper = Frame::new(16, 16, BLACK);
        let mut lower = Frame::new(16, 16, BLACK);
        overlay_text(&mut upper, 0, 0, "K", WHITE, 2);
        overlay_text(&mut lower, 0, 0, "k", WHITE, 2);
        assert_eq!(upper, lower);
        assert_eq!(upper.get(1, 1), WHITE);
        assert_eq!(upper.get(2, 0), BLACK);
    }

    #[test]
    fn lines_stack_and_clip() {
        let mut frame = Frame::new(6, 10, BLACK);
        overlay_lines(&mut frame, 0, 0, &["1", "1", "1"], WHITE, 1);
        assert_eq!(frame.get(1, 0), WHITE);
        assert_eq!(frame.get(1, 7), WHITE);
    }
}
